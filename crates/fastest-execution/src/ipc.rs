//! The worker IPC wire protocol: a 4-byte big-endian length prefix followed
//! by that many bytes of MessagePack-encoded payload. Used symmetrically by
//! the host (`worker_pool`) and the worker binary (`fastest-worker`), so
//! both sides of the channel share this module's framing and message
//! shapes.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use fastest_core::{FixturePlan, TestItem, TestResult};

use crate::error::{ExecutionError, Result};

/// Frames above this size are refused rather than allocated; a well-formed
/// worker never needs one this large.
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// A single dispatch record as it travels over the wire. A flattened
/// counterpart to [`fastest_core::WorkUnit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireUnit {
    pub req_id: u64,
    pub items: Vec<(TestItem, FixturePlan)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HostMessage {
    Exec { req_id: u64, unit: WireUnit },
    /// Instructs the worker to finalize teardown for a module/session-scoped
    /// fixture whose last referencing unit has completed.
    Teardown { scope_key_json: String },
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkerMessage {
    Ready,
    /// One item's result, flushed as soon as it finishes executing rather
    /// than batched with the rest of its unit. A worker that crashes after
    /// emitting some of these for a unit has already gotten those items'
    /// outcomes onto the wire before the host ever observes the crash.
    ItemResult {
        req_id: u64,
        result: TestResult,
    },
    /// Marks that every item in `req_id`'s unit has had an `ItemResult` sent.
    UnitDone {
        req_id: u64,
    },
    Fatal {
        req_id: Option<u64>,
        error: String,
    },
}

/// Writes one length-prefixed frame and flushes.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let payload = rmp_serde::to_vec_named(message)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(ExecutionError::FrameTooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame. Returns `Ok(None)` on a clean EOF before
/// any bytes of the next frame arrive (the crash-detection signal, spec
/// §4.4: "a worker's stdout closes").
pub fn read_frame<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match read_exact_or_eof(reader, &mut len_buf)? {
        false => return Ok(None),
        true => {}
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ExecutionError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    let message = rmp_serde::from_slice(&payload)?;
    Ok(Some(message))
}

/// Like `Read::read_exact` but treats zero bytes read before any data as a
/// clean EOF (`Ok(false)`) rather than an `UnexpectedEof` error, since a
/// worker closing its stdout between frames is an expected crash signal.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(ExecutionError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "worker closed mid-frame",
                )));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ExecutionError::Io(e)),
        }
    }
    Ok(true)
}
