//! Line-oriented link to the sensor/motor microcontroller
//!
//! The board shares one serial line for both directions: a `.` line polls
//! for a reading, a `y,z` line commands the motors.

use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::io::{
    split, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::state::Orientation;

use super::reading::{parse_reading, SensorReading};
use super::SensorError;

/// Poll command understood by the board
const POLL: &[u8] = b".\n";

/// Line speed of the board's USB serial
pub const DEFAULT_BAUD: u32 = 9600;

/// How long to wait for the board to answer a poll
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Serial link over any byte stream
pub struct SerialLink<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    reply_timeout: Duration,
    line: String,
}

impl SerialLink<SerialStream> {
    /// Open the board's serial port in raw 8N1 mode
    pub fn open(path: &Path, baud: u32, reply_timeout: Duration) -> Result<Self, SensorError> {
        let port = serialport::new(path.to_string_lossy(), baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| SensorError::Open {
                path: path.display().to_string(),
                source: io::Error::from(e),
            })?;
        info!(path = %path.display(), baud, "serial link open");
        Ok(Self::new(port, reply_timeout))
    }
}

impl<S: AsyncRead + AsyncWrite> SerialLink<S> {
    pub fn new(stream: S, reply_timeout: Duration) -> Self {
        let (reader, writer) = split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
            reply_timeout,
            line: String::new(),
        }
    }

    /// Poll the board and parse its reply
    pub async fn request_reading(&mut self) -> Result<SensorReading, SensorError> {
        self.writer.write_all(POLL).await?;
        self.writer.flush().await?;

        self.line.clear();
        let read = tokio::time::timeout(self.reply_timeout, self.reader.read_line(&mut self.line))
            .await
            .map_err(|_| SensorError::Timeout)??;

        if read == 0 {
            return Err(SensorError::Closed);
        }

        debug!(line = self.line.trim(), "sensor reply");
        parse_reading(&self.line)
    }

    /// Command the motors to an orientation
    pub async fn send_orientation(&mut self, target: Orientation) -> Result<(), SensorError> {
        let command = format!("{},{}\n", target.y, target.z);
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_request_reading() {
        let (ours, mut board) = duplex(256);
        let mut link = SerialLink::new(ours, Duration::from_secs(1));

        let board_task = tokio::spawn(async move {
            let mut poll = [0u8; 2];
            board.read_exact(&mut poll).await.unwrap();
            assert_eq!(&poll, b".\n");
            board.write_all(b"y: 5.0, z: 6.0, pressure: 1\n").await.unwrap();
            board
        });

        let reading = link.request_reading().await.unwrap();
        assert_eq!(reading.orientation, Orientation { y: 5, z: 6 });
        assert!(reading.pressure);
        board_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_reply_timeout() {
        let (ours, _board) = duplex(256);
        let mut link = SerialLink::new(ours, Duration::from_millis(20));
        assert!(matches!(link.request_reading().await, Err(SensorError::Timeout)));
    }

    #[tokio::test]
    async fn test_closed_board() {
        let (ours, board) = duplex(256);
        let mut link = SerialLink::new(ours, Duration::from_secs(1));
        drop(board);
        assert!(link.request_reading().await.is_err());
    }

    #[tokio::test]
    async fn test_open_missing_port() {
        let result = SerialLink::open(Path::new("/nonexistent/ttyBLANC"), DEFAULT_BAUD, REPLY_TIMEOUT);
        match result {
            Err(SensorError::Open { path, .. }) => assert_eq!(path, "/nonexistent/ttyBLANC"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("opened a missing port"),
        }
    }

    #[tokio::test]
    async fn test_send_orientation() {
        let (ours, mut board) = duplex(256);
        let mut link = SerialLink::new(ours, Duration::from_secs(1));

        link.send_orientation(Orientation { y: -15, z: 40 }).await.unwrap();

        let mut buf = [0u8; 7];
        board.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"-15,40\n");
    }
}
