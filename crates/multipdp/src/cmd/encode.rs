use std::fs::File;
use std::io::{BufWriter, Write};

use multipdp_frame::{FrameConfig, FrameWriter, MAX_WIRE_PAYLOAD};
use tracing::info;

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: EncodeArgs) -> CliResult<i32> {
    if args.max_payload == 0 || args.max_payload > MAX_WIRE_PAYLOAD {
        return Err(CliError::new(
            USAGE,
            format!("--max-payload must be between 1 and {MAX_WIRE_PAYLOAD}"),
        ));
    }

    let payload = match (&args.data, &args.file) {
        (Some(data), _) => data.as_bytes().to_vec(),
        (None, Some(path)) => std::fs::read(path)
            .map_err(|err| io_error(&format!("read {} failed", path.display()), err))?,
        (None, None) => return Err(CliError::new(USAGE, "one of --data or --file is required")),
    };

    let config = FrameConfig {
        max_payload_size: args.max_payload,
    };
    let frames = match &args.out {
        Some(path) => {
            let file = File::create(path)
                .map_err(|err| io_error(&format!("create {} failed", path.display()), err))?;
            write_frames(BufWriter::new(file), config, args.channel, &payload)?
        }
        None => write_frames(std::io::stdout().lock(), config, args.channel, &payload)?,
    };

    info!(
        channel = args.channel,
        frames,
        bytes = payload.len(),
        "payload encoded"
    );
    Ok(SUCCESS)
}

fn write_frames<W: Write>(
    out: W,
    config: FrameConfig,
    channel: u8,
    payload: &[u8],
) -> CliResult<usize> {
    let mut writer = FrameWriter::with_config(out, config);
    let frames = writer
        .send(channel, payload)
        .map_err(|err| frame_error("write failed", err))?;
    writer
        .flush()
        .map_err(|err| frame_error("flush failed", err))?;
    Ok(frames)
}
