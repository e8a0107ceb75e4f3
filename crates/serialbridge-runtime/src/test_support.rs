//! In-memory serial doubles shared by the runtime tests.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

pub const STATUS_LINE: &str = r#"{"game_type":1,"game_progress":2,"remain_hp":100,"max_hp":100,"stage_remain_time":60,"bullet_remaining_num_17mm":50,"red_outpost_hp":1500,"red_base_hp":2000,"blue_outpost_hp":1500,"blue_base_hp":2000,"rfid_status":0}"#;

/// Writer that records everything written to it.
#[derive(Clone, Default)]
pub struct SharedWriter {
    sink: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    pub fn contents(&self) -> Vec<u8> {
        self.sink.lock().unwrap().clone()
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer standing in for an unplugged device.
pub struct BrokenWriter;

impl Write for BrokenWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reader that always reports a device failure.
pub struct BrokenReader;

impl Read for BrokenReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
    }
}

/// Reader that fails once with a device error, then replays `data`.
pub struct FailOnceReader {
    failed: bool,
    data: io::Cursor<Vec<u8>>,
}

impl FailOnceReader {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            failed: false,
            data: io::Cursor::new(data.into()),
        }
    }
}

impl Read for FailOnceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.failed {
            self.failed = true;
            return Err(io::Error::other("framing error"));
        }
        self.data.read(buf)
    }
}

/// Reader of an idle link: every read times out.
pub struct IdleReader;

impl Read for IdleReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::TimedOut, "idle"))
    }
}
