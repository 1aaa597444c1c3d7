//! In-memory transport replaying scripted device replies.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rusb::Direction;

use super::loopy_ds::{FRAME_SIZE, INFO_SIZE, VALID_FLAG_OFFSET};
use super::{ControlRequest, Transport};
use crate::error::{Error, Result};

pub(crate) enum Reply {
    Control(Result<Vec<u8>>),
    Bulk(Result<Vec<u8>>),
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    requests: Vec<ControlRequest>,
    bulk_reads: usize,
}

/// Test-side view of a [`ScriptedTransport`] after it moved into a session.
#[derive(Clone, Default)]
pub(crate) struct ScriptHandle(Arc<Mutex<Script>>);

impl ScriptHandle {
    pub(crate) fn push(&self, replies: impl IntoIterator<Item = Reply>) {
        self.0.lock().replies.extend(replies);
    }

    pub(crate) fn requests(&self) -> Vec<ControlRequest> {
        self.0.lock().requests.clone()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.0.lock().replies.len()
    }
}

pub(crate) struct ScriptedTransport {
    script: ScriptHandle,
    open: bool,
}

impl ScriptedTransport {
    pub(crate) fn new() -> (Self, ScriptHandle) {
        let script = ScriptHandle::default();
        (
            Self {
                script: script.clone(),
                open: true,
            },
            script,
        )
    }
}

impl Transport for ScriptedTransport {
    fn control_transfer(&mut self, request: ControlRequest, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(Error::Closed);
        }
        let mut script = self.script.0.lock();
        script.requests.push(request);
        match script.replies.pop_front() {
            Some(Reply::Control(Ok(data))) => match request.direction() {
                Direction::In => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                Direction::Out => Ok(buf.len()),
            },
            Some(Reply::Control(Err(e))) => Err(e),
            Some(Reply::Bulk(_)) => panic!("control transfer while a bulk read was scripted"),
            None => Err(Error::Transfer(rusb::Error::Timeout)),
        }
    }

    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(Error::Closed);
        }
        let mut script = self.script.0.lock();
        script.bulk_reads += 1;
        match script.replies.pop_front() {
            Some(Reply::Bulk(Ok(data))) => {
                assert!(data.len() <= buf.len(), "scripted chunk overruns the read");
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
            Some(Reply::Bulk(Err(e))) => Err(e),
            Some(Reply::Control(_)) => panic!("bulk read while a control transfer was scripted"),
            None => Err(Error::Transfer(rusb::Error::Timeout)),
        }
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Descriptor with the given scanlines marked as sent.
pub(crate) fn info_with_lines(lines: impl IntoIterator<Item = usize>, valid: bool) -> [u8; INFO_SIZE] {
    let mut info = [0u8; INFO_SIZE];
    for line in lines {
        info[line >> 3] |= 1 << (line & 7);
    }
    info[VALID_FLAG_OFFSET] = valid as u8;
    info
}

/// Payload whose every sample encodes its own index.
pub(crate) fn counting_payload() -> Vec<u8> {
    (0..FRAME_SIZE / 2)
        .flat_map(|i| (i as u16).to_le_bytes())
        .collect()
}

/// Replies for one complete frame exchange, payload split into `chunk` sized reads.
pub(crate) fn frame_replies(payload: &[u8], info: &[u8; INFO_SIZE], chunk: usize) -> Vec<Reply> {
    let mut replies = vec![Reply::Control(Ok(Vec::new()))];
    replies.extend(payload.chunks(chunk).map(|c| Reply::Bulk(Ok(c.to_vec()))));
    replies.push(Reply::Control(Ok(info.to_vec())));
    replies
}
