use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use multipdp_frame::{FrameConfig, FrameError, FrameReader};
use tracing::info;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_fault, print_frame, OutputFormat};

/// Byte-offset tracking wrapper so faults can point into the capture.
struct Counted<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let input: Box<dyn Read> = match args.file.as_deref() {
        Some(path) if path != Path::new("-") => Box::new(BufReader::new(
            File::open(path)
                .map_err(|err| io_error(&format!("open {} failed", path.display()), err))?,
        )),
        _ => Box::new(io::stdin().lock()),
    };

    let mut reader = FrameReader::with_config(
        Counted {
            inner: input,
            offset: 0,
        },
        FrameConfig {
            max_payload_size: args.max_payload,
        },
    );

    let mut frames = 0usize;
    let mut faults = 0usize;
    // Consecutive stray bytes are reported as one fault.
    let mut skipped: Option<(u64, usize)> = None;

    loop {
        let offset = reader.get_ref().offset;
        let result = reader.read_frame();
        if !matches!(result, Err(FrameError::BadStart(_))) {
            if let Some((start, count)) = skipped.take() {
                faults += 1;
                print_fault(start, &format!("skipped {count} bytes outside any frame"), format);
            }
        }

        match result {
            Ok(frame) => {
                frames += 1;
                let wanted = args
                    .channels
                    .as_ref()
                    .is_none_or(|channels| channels.contains(&frame.channel));
                if wanted {
                    print_frame(frames, &frame, format);
                }
            }
            Err(FrameError::BadStart(_)) => {
                let (_, count) = skipped.get_or_insert((offset, 0));
                *count += 1;
            }
            Err(FrameError::ConnectionClosed) => {
                if reader.get_ref().offset > offset {
                    faults += 1;
                    print_fault(offset, "truncated frame at end of capture", format);
                }
                break;
            }
            Err(err) if err.is_transport() => return Err(frame_error("read failed", err)),
            Err(err) => {
                faults += 1;
                print_fault(offset, &err.to_string(), format);
            }
        }
    }

    info!(frames, faults, "capture decoded");
    Ok(SUCCESS)
}
