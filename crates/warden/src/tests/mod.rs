use super::*;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime};

mod support;
use support::*;
