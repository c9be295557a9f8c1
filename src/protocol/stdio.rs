// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! JSON-lines transport: one request per input line, one event per output line

use super::{Dispatcher, HostEvent, HostRequest};
use crate::error::Result;
use std::io::{BufRead, Write};
use std::sync::mpsc::Receiver;
use std::thread;

/// Serve requests from `input` until it closes, writing events to `output`.
///
/// Blank lines are ignored; undecodable lines produce an `error` event.
/// Returns once every queued request has been answered.
pub fn serve<R, W>(
    dispatcher: Dispatcher,
    events: Receiver<HostEvent>,
    input: R,
    output: W,
) -> Result<()>
where
    R: BufRead,
    W: Write + Send,
{
    thread::scope(|scope| {
        let writer = scope.spawn(move || write_events(events, output));

        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("Failed to read request: {}", e);
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<HostRequest>(line) {
                Ok(request) => dispatcher.send(request),
                Err(e) => dispatcher.reject(e.to_string()),
            }
        }

        tracing::info!("Input closed; draining pending requests");
        // Dropping the dispatcher closes the event channel, ending the writer
        dispatcher.shutdown();
        match writer.join() {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Event writer panicked");
                Ok(())
            }
        }
    })
}

fn write_events<W: Write>(events: Receiver<HostEvent>, mut output: W) -> Result<()> {
    for event in events {
        serde_json::to_writer(&mut output, &event)?;
        output.write_all(b"\n")?;
        output.flush()?;
    }
    Ok(())
}
