use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use multipdp_frame::{Frame, CSD, GPS, ROUTER};
use multipdp_mux::{ChannelInfo, StatsSnapshot};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One payload handed to a sink by the running multiplexer.
#[derive(Serialize)]
struct DeliveryOutput<'a> {
    event: &'static str,
    channel: u8,
    channel_name: &'a str,
    sink: &'a str,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_delivery(channel: u8, sink: &str, payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = DeliveryOutput {
                event: "delivery",
                channel,
                channel_name: channel_name(channel),
                sink,
                payload_size: payload.len(),
                payload: payload_preview(payload),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "SINK", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    format!("{channel} ({})", channel_name(channel)),
                    sink.to_string(),
                    payload.len().to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} ({}) sink={} size={} payload={}",
                channel,
                channel_name(channel),
                sink,
                payload.len(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    event: &'static str,
    index: usize,
    channel: u8,
    channel_name: &'a str,
    payload_size: usize,
    payload: String,
}

pub fn print_frame(index: usize, frame: &Frame, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                event: "frame",
                index,
                channel: frame.channel,
                channel_name: channel_name(frame.channel),
                payload_size: frame.payload.len(),
                payload: payload_preview(frame.payload.as_ref()),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "CHANNEL", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    index.to_string(),
                    format!("{} ({})", frame.channel, channel_name(frame.channel)),
                    frame.payload.len().to_string(),
                    payload_preview(frame.payload.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "#{} channel={} ({}) size={} payload={}",
                index,
                frame.channel,
                channel_name(frame.channel),
                frame.payload.len(),
                payload_preview(frame.payload.as_ref())
            );
        }
        OutputFormat::Raw => print_raw(frame.payload.as_ref()),
    }
}

#[derive(Serialize)]
struct FaultOutput<'a> {
    event: &'static str,
    offset: u64,
    fault: &'a str,
}

pub fn print_fault(offset: u64, fault: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FaultOutput {
                event: "fault",
                offset,
                fault,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => println!("fault at byte {offset}: {fault}"),
        OutputFormat::Raw => {}
    }
}

pub fn print_channels(channels: &[ChannelInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for channel in channels {
                println!(
                    "{}",
                    serde_json::to_string(channel).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "KIND", "SINK", "STICKY"]);
            for channel in channels {
                table.add_row(vec![
                    channel.id.to_string(),
                    channel.kind.to_string(),
                    channel.name.clone(),
                    channel.sticky.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for channel in channels {
                println!(
                    "id={} kind={} sink={} sticky={}",
                    channel.id, channel.kind, channel.name, channel.sticky
                );
            }
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_stats(stats: &StatsSnapshot, format: OutputFormat) {
    let rows = [
        ("frames_rx", stats.frames_rx),
        ("bytes_rx", stats.bytes_rx),
        ("frames_tx", stats.frames_tx),
        ("bytes_tx", stats.bytes_tx),
        ("bad_start", stats.bad_start),
        ("bad_end", stats.bad_end),
        ("malformed", stats.malformed),
        ("unknown_channel", stats.unknown_channel),
        ("closed_channel_drops", stats.closed_channel_drops),
        ("sink_errors", stats.sink_errors),
        ("stream_overruns", stats.stream_overruns),
        ("queue_rejections", stats.queue_rejections),
    ];
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct StatsOutput<'a> {
                event: &'static str,
                #[serde(flatten)]
                stats: &'a StatsSnapshot,
            }
            let out = StatsOutput {
                event: "stats",
                stats,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in rows {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = rows
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn channel_name(channel: u8) -> &'static str {
    match channel {
        CSD => "CSD",
        ROUTER => "ROUTER",
        GPS => "GPS",
        _ => "PDP",
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_channels_are_named() {
        assert_eq!(channel_name(1), "CSD");
        assert_eq!(channel_name(25), "ROUTER");
        assert_eq!(channel_name(5), "GPS");
        assert_eq!(channel_name(2), "PDP");
    }

    #[test]
    fn binary_payloads_are_summarized() {
        assert_eq!(payload_preview(b"AT"), "AT");
        assert_eq!(payload_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }
}
