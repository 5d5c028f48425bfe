//! Opaque command dispatch.
//!
//! Commands pass through verbatim; the bridge understands none of them. The
//! only local rule is rejecting an empty argv. Failed commands are surfaced
//! once and never retried.

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::engine::MediaEngine;
use crate::error::{BridgeError, BridgeResult};

pub struct CommandDispatcher {
    engine: Arc<dyn MediaEngine>,
}

impl CommandDispatcher {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self { engine }
    }

    pub async fn dispatch(&self, argv: &[String]) -> BridgeResult<Value> {
        if argv.is_empty() {
            return Err(BridgeError::CommandFailed {
                code: -1,
                message: "empty command".into(),
            });
        }
        debug!("dispatch command: {}", argv.join(" "));
        self.engine.command(argv).await
    }
}
