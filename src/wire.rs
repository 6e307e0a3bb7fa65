//! JSON-lines front-end: one command per input line, one response per output line.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::command::{self, Command, CommandError};
use crate::engine::{Scheduler, SchedulingError};
use crate::model::{Decision, Rejection};

/// Longest accepted request line.
pub const MAX_LINE_LENGTH: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub code: String,
    pub body: Value,
}

impl Response {
    fn new(status: u16, code: &str, body: Value) -> Self {
        Self {
            status,
            code: code.to_string(),
            body,
        }
    }

    fn ok(status: u16, code: &str, body: impl Serialize) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self::new(status, code, body),
            Err(e) => Self::new(500, "internal", json!({ "message": e.to_string() })),
        }
    }

    fn rejected(rejection: &Rejection) -> Self {
        let body = match rejection {
            Rejection::Conflicts(report) | Rejection::LateConflicts(report) => json!(report),
            Rejection::Duplicate(slot) => json!({ "slot": slot, "message": slot.to_string() }),
        };
        Self::new(rejection.status(), rejection.code(), body)
    }

    fn error(e: &SchedulingError) -> Self {
        let body = match e {
            SchedulingError::SeriesInterrupted { series_id, booking_ids, .. } => json!({
                "message": e.to_string(),
                "seriesId": series_id,
                "bookingIds": booking_ids,
            }),
            _ => json!({ "message": e.to_string() }),
        };
        Self::new(e.status(), e.code(), body)
    }

    fn invalid(e: &CommandError) -> Self {
        Self::new(e.status(), e.code(), json!({ "message": e.to_string() }))
    }
}

fn decided<T: Serialize>(decision: Decision<T>, status: u16) -> Response {
    match decision {
        Decision::Committed(value) => Response::ok(status, "committed", value),
        Decision::Rejected(rejection) => Response::rejected(&rejection),
    }
}

/// Run one command. Faults become error responses; nothing here fails the stream.
pub async fn execute(scheduler: &Scheduler, command: Command) -> Response {
    let op = command.op();
    match dispatch(scheduler, command).await {
        Ok(response) => {
            debug!(op, status = response.status, code = %response.code, "command done");
            response
        }
        Err(e) => {
            debug!(op, code = e.code(), "command failed: {e}");
            Response::error(&e)
        }
    }
}

async fn dispatch(scheduler: &Scheduler, command: Command) -> Result<Response, SchedulingError> {
    let clock = scheduler.clock();
    match command {
        Command::ValidateSingle { booking, exclude_id } => {
            let candidate = booking.resolve(clock)?;
            let report = scheduler.validate_single(&candidate, exclude_id).await?;
            Ok(Response::ok(200, "ok", report))
        }
        Command::ValidateSeries { series } => {
            let request = series.resolve(clock)?;
            let report = scheduler.validate_series(&request).await?;
            Ok(Response::ok(200, "ok", report))
        }
        Command::ScheduleSingle { booking, force } => {
            let candidate = booking.resolve(clock)?;
            Ok(decided(scheduler.schedule_single(candidate, force).await?, 201))
        }
        Command::ScheduleSeries { series, force } => {
            let request = series.resolve(clock)?;
            Ok(decided(scheduler.schedule_series(&request, force).await?, 201))
        }
        Command::UpdateBooking { id, booking, force } => {
            let candidate = booking.resolve(clock)?;
            Ok(decided(scheduler.update_booking(id, candidate, force).await?, 200))
        }
        Command::CancelBooking { id } => {
            let removed = scheduler.cancel_booking(id).await?;
            Ok(Response::ok(200, "cancelled", removed))
        }
    }
}

/// Request framing. A line that is too long or not UTF-8 is yielded as a
/// per-line error so the stream keeps going.
struct RequestLines(LinesCodec);

impl RequestLines {
    fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
    }

    fn per_line(
        decoded: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Result<String, CommandError>>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(Ok)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Err(CommandError::Parse(format!(
                "line longer than {MAX_LINE_LENGTH} bytes"
            ))))),
            // LinesCodec has already consumed the offending line.
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Err(CommandError::Parse("line is not valid UTF-8".into()))))
            }
            Err(e) => Err(e),
        }
    }
}

impl Decoder for RequestLines {
    type Item = Result<String, CommandError>;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Self::per_line(self.0.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Self::per_line(self.0.decode_eof(buf))
    }
}

/// Serve commands until the reader reaches EOF. Only I/O errors end the stream early.
pub async fn process_stream<R, W>(reader: R, writer: W, scheduler: Arc<Scheduler>) -> Result<(), LinesCodecError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut requests = FramedRead::new(reader, RequestLines::new());
    let mut responses = FramedWrite::new(writer, LinesCodec::new());

    while let Some(line) = requests.next().await {
        let parsed = match line? {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => command::parse_command(&line),
            Err(e) => Err(e),
        };
        let response = match parsed {
            Ok(command) => execute(&scheduler, command).await,
            Err(e) => {
                warn!("rejected request line: {e}");
                Response::invalid(&e)
            }
        };
        let encoded = serde_json::to_string(&response).map_err(|e| LinesCodecError::Io(e.into()))?;
        responses.send(encoded).await?;
    }
    SinkExt::<String>::flush(&mut responses).await?;
    Ok(())
}
