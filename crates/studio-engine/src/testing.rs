use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex, PoisonError};

use serde_json::{json, Value};

use crate::error::StudioError;
use crate::transport::{GenerateRequest, ImageTransport};

pub(crate) type RecordedRequests = Arc<Mutex<Vec<GenerateRequest>>>;

/// Stand-in for the remote service: answers from a queue and records every
/// request it sees.
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Value, StudioError>>>,
    requests: RecordedRequests,
    gate: Option<Gate>,
}

struct Gate {
    entered: mpsc::Sender<()>,
    release: Mutex<mpsc::Receiver<()>>,
}

/// Test-side ends of a gated transport: `entered` fires when a request
/// arrives, sending on `release` lets it answer.
pub(crate) struct GateHandle {
    pub entered: mpsc::Receiver<()>,
    pub release: mpsc::Sender<()>,
}

impl ScriptedTransport {
    pub(crate) fn new(responses: Vec<Result<Value, StudioError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
            gate: None,
        }
    }

    pub(crate) fn gated(responses: Vec<Result<Value, StudioError>>) -> (Self, GateHandle) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let mut transport = Self::new(responses);
        transport.gate = Some(Gate {
            entered: entered_tx,
            release: Mutex::new(release_rx),
        });
        (
            transport,
            GateHandle {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }

    pub(crate) fn requests(&self) -> RecordedRequests {
        Arc::clone(&self.requests)
    }
}

impl ImageTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate_content(&self, request: &GenerateRequest) -> Result<Value, StudioError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if let Some(gate) = self.gate.as_ref() {
            let _ = gate.entered.send(());
            let _ = gate
                .release
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recv();
        }
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(StudioError::Transport("no scripted response".to_string())))
    }
}

pub(crate) fn image_response(data: &str) -> Value {
    json!({
        "candidates": [{
            "content": {
                "parts": [{"inlineData": {"mimeType": "image/png", "data": data}}]
            }
        }]
    })
}

pub(crate) fn entity_not_found() -> StudioError {
    StudioError::Api {
        status: 404,
        message: "{\"error\":{\"code\":404,\"message\":\"Requested entity was not found.\"}}"
            .to_string(),
    }
}
