//! Feeds raw bytes to a demo child's dispatch loop to pin down its error
//! handling: only EOF ends the loop, everything else is answered.

use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
};
use warden_child::{Request, Response, ResponseKind};

const PANIC_CHILD: &str = env!("CARGO_BIN_EXE_panic-child");

fn spawn_server() -> (Child, ChildStdin, Lines<BufReader<ChildStdout>>) {
    let mut child = Command::new(PANIC_CHILD)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let stdin = child.stdin.take().unwrap();
    let lines = BufReader::new(child.stdout.take().unwrap()).lines();
    (child, stdin, lines)
}

async fn next_response(lines: &mut Lines<BufReader<ChildStdout>>) -> Response {
    let line = lines.next_line().await.unwrap().unwrap();
    serde_json::from_str(&line).unwrap()
}

async fn send_request(stdin: &mut ChildStdin, request: &Request) {
    let mut frame = serde_json::to_vec(request).unwrap();
    frame.push(b'\n');
    stdin.write_all(&frame).await.unwrap();
    stdin.flush().await.unwrap();
}

#[tokio::test]
async fn malformed_lines_are_answered_and_the_loop_continues() {
    let (mut child, mut stdin, mut lines) = spawn_server();

    stdin.write_all(b"this is not json\n").await.unwrap();
    stdin.flush().await.unwrap();
    let response = next_response(&mut lines).await;
    assert_eq!(response.kind, ResponseKind::Error);
    assert!(response.error_message().contains("malformed request"));

    // The loop keeps serving after the bad frame.
    send_request(&mut stdin, &Request::new("ok", vec![])).await;
    let response = next_response(&mut lines).await;
    assert_eq!(response.kind, ResponseKind::Return);
    assert_eq!(response.payload, json!("still here"));

    // EOF is still the only way out, and it is a clean one.
    drop(stdin);
    let status = child.wait().await.unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn invalid_utf8_input_does_not_end_the_loop() {
    let (mut child, mut stdin, mut lines) = spawn_server();

    // Non-UTF-8 bytes surface from the line reader as a read error, not a
    // parse error; the loop must answer and carry on all the same.
    stdin.write_all(b"\xff\xfe\xfd\n").await.unwrap();
    stdin.flush().await.unwrap();
    let response = next_response(&mut lines).await;
    assert_eq!(response.kind, ResponseKind::Error);
    assert!(response.error_message().contains("malformed request"));

    send_request(&mut stdin, &Request::new("ok", vec![])).await;
    let response = next_response(&mut lines).await;
    assert_eq!(response.kind, ResponseKind::Return);
    assert_eq!(response.payload, json!("still here"));

    drop(stdin);
    let status = child.wait().await.unwrap();
    assert!(status.success());
}
