//! Management surface: activation, deactivation and id-offset requests.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelType;
use crate::error::ManagementError;
use crate::mux::Multiplexer;

/// A control request, as it arrives on the management surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ManagementRequest {
    Activate {
        requested_id: i32,
        kind: ChannelType,
        #[serde(default)]
        sticky: bool,
    },
    Deactivate {
        requested_id: i32,
        #[serde(default)]
        force: bool,
    },
    /// Replace the offset applied to data-channel ids.
    AdjustIdOffset { delta: i32 },
}

/// Reply to a successful [`ManagementRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ManagementResponse {
    Activated { effective_id: u8, sink_name: String },
    Deactivated,
    OffsetAdjusted { offset: i32 },
}

impl<W: Write> Multiplexer<W> {
    /// Dispatch one management request.
    pub fn handle(&self, request: ManagementRequest) -> Result<ManagementResponse, ManagementError> {
        match request {
            ManagementRequest::Activate {
                requested_id,
                kind,
                sticky,
            } => {
                let info = self.activate(requested_id, kind, sticky)?;
                Ok(ManagementResponse::Activated {
                    effective_id: info.effective_id,
                    sink_name: info.sink_name,
                })
            }
            ManagementRequest::Deactivate {
                requested_id,
                force,
            } => {
                self.deactivate(requested_id, force)?;
                Ok(ManagementResponse::Deactivated)
            }
            ManagementRequest::AdjustIdOffset { delta } => Ok(ManagementResponse::OffsetAdjusted {
                offset: self.set_id_adjustment(delta),
            }),
        }
    }
}
