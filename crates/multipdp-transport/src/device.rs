use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::DeviceStream;

/// DPRAM character device transport.
///
/// Opens the device node read/write. Only character devices and FIFOs are
/// accepted; a regular file has no peer on the other side and would make the
/// reader spin on EOF.
pub struct DpramDevice;

impl DpramDevice {
    /// Device node exposed by the DPRAM driver for the multiplexed link.
    pub const DEFAULT_PATH: &'static str = "/dev/dpram1";

    /// Open the device node at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<DeviceStream> {
        let path = path.as_ref().to_path_buf();

        let metadata = std::fs::metadata(&path).map_err(|e| TransportError::Open {
            path: path.clone(),
            source: e,
        })?;
        let file_type = metadata.file_type();
        if !file_type.is_char_device() && !file_type.is_fifo() {
            return Err(open_error(
                path,
                std::io::ErrorKind::InvalidInput,
                "not a character device or fifo",
            ));
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| TransportError::Open {
                path: path.clone(),
                source: e,
            })?;

        if file_type.is_fifo() {
            debug!(?path, "opened fifo in place of a character device");
        }
        info!(?path, "opened dpram device");

        Ok(DeviceStream::from_device(file))
    }
}

fn open_error(path: PathBuf, kind: std::io::ErrorKind, msg: &'static str) -> TransportError {
    TransportError::Open {
        path,
        source: std::io::Error::new(kind, msg),
    }
}
