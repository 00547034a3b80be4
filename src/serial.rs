use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::io::{BufRead, BufReader};
use std::time::Duration;

use crate::adc::{AdcSource, RawSample};

pub const DATA_BITS: serialport::DataBits = serialport::DataBits::Eight;
pub const PARITY: serialport::Parity = serialport::Parity::None;
pub const STOP_BITS: serialport::StopBits = serialport::StopBits::One;

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
/// Lines read from a candidate port before giving up on it.
const PROBE_LINES: usize = 8;
/// Consecutive malformed lines tolerated while reading a sample.
const MAX_GARBAGE_LINES: usize = 32;

/// Open a serial port to the ADC bridge with 8N1 settings.
/// DTR is raised because CDC-ACM bridges only stream once a host is attached.
pub fn open_port(path: &str, baud_rate: u32, timeout: Duration) -> Result<Box<dyn serialport::SerialPort>> {
    let mut port = serialport::new(path, baud_rate)
        .data_bits(DATA_BITS)
        .parity(PARITY)
        .stop_bits(STOP_BITS)
        .timeout(timeout)
        .open()
        .with_context(|| format!("Failed to open serial port {}", path))?;

    port.write_data_terminal_ready(true)
        .context("Failed to set DTR")?;

    Ok(port)
}

/// Parse one bridge frame of the form `<voltage>,<current>` (raw ADC counts).
pub fn parse_frame(line: &str) -> Option<RawSample> {
    let (v, i) = line.trim().split_once(',')?;
    Some(RawSample {
        voltage: v.trim().parse().ok()?,
        current: i.trim().parse().ok()?,
    })
}

/// Line input that can drop bytes received but not yet consumed.
pub trait PendingInput: BufRead {
    fn discard_pending(&mut self) -> Result<()>;
}

impl PendingInput for BufReader<Box<dyn serialport::SerialPort>> {
    fn discard_pending(&mut self) -> Result<()> {
        let buffered = self.buffer().len();
        self.consume(buffered);
        self.get_mut()
            .clear(serialport::ClearBuffer::Input)
            .context("Failed to clear serial input buffer")
    }
}

/// Raw sample stream from a microcontroller forwarding ADC reads over serial.
pub struct SerialAdc<R> {
    reader: R,
}

impl SerialAdc<BufReader<Box<dyn serialport::SerialPort>>> {
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        info!("Opening {} at {} baud for ADC samples", path, baud_rate);
        let port = open_port(path, baud_rate, timeout)?;
        Ok(Self::new(BufReader::new(port)))
    }
}

impl<R: BufRead> SerialAdc<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: PendingInput + Send> AdcSource for SerialAdc<R> {
    fn read(&mut self) -> Result<RawSample> {
        let mut line = String::new();
        for _ in 0..MAX_GARBAGE_LINES {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .context("Failed to read line from serial port")?;

            if bytes_read == 0 {
                bail!("Serial port returned EOF while waiting for a sample");
            }

            match parse_frame(&line) {
                Some(sample) => return Ok(sample),
                None => debug!("Ignoring serial line: {:?}", line.trim()),
            }
        }
        bail!("No valid ADC frame in {} consecutive lines", MAX_GARBAGE_LINES)
    }

    /// Drop frames queued since the last window, then skip to the next line
    /// boundary so a torn frame is never parsed as a sample.
    fn begin_window(&mut self) -> Result<()> {
        self.reader.discard_pending()?;
        let mut partial = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut partial)
            .context("Failed to read line from serial port")?;
        if bytes_read == 0 {
            bail!("Serial port returned EOF while waiting for a frame boundary");
        }
        debug!("Dropped partial serial line: {:?}", partial.trim());
        Ok(())
    }
}

/// Probe a single port: accept it if any of the first few lines is a valid frame.
fn probe_port(path: &str, baud_rate: u32) -> Result<Option<Box<dyn serialport::SerialPort>>> {
    debug!("Probing port {}", path);
    let mut port = open_port(path, baud_rate, PROBE_TIMEOUT)?;

    let found = {
        let mut reader = BufReader::new(&mut *port);
        let mut line = String::new();
        let mut found = false;
        for _ in 0..PROBE_LINES {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            if parse_frame(&line).is_some() {
                found = true;
                break;
            }
        }
        found
    };

    if found {
        info!("Found ADC bridge on port {}", path);
        Ok(Some(port))
    } else {
        debug!("Port {} did not produce ADC frames", path);
        Ok(None)
    }
}

/// Enumerate USB serial ports and return the first one streaming ADC frames.
pub fn find_adc_port(baud_rate: u32) -> Result<(String, Box<dyn serialport::SerialPort>)> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;

    let usb_ports: Vec<_> = ports
        .iter()
        .filter(|p| p.port_name.contains("ttyUSB") || p.port_name.contains("ttyACM"))
        .collect();

    if usb_ports.is_empty() {
        bail!("No /dev/ttyUSB* or /dev/ttyACM* ports found");
    }

    info!("Found {} USB serial port(s), probing for ADC bridge", usb_ports.len());

    for port_info in &usb_ports {
        match probe_port(&port_info.port_name, baud_rate) {
            Ok(Some(port)) => return Ok((port_info.port_name.clone(), port)),
            Ok(None) => continue,
            Err(e) => {
                warn!("Error probing {}: {}", port_info.port_name, e);
                continue;
            }
        }
    }

    bail!(
        "No ADC bridge found on any of the {} USB serial port(s)",
        usb_ports.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // In-memory streams have no device buffer, only the reader's own.
    impl PendingInput for BufReader<&[u8]> {
        fn discard_pending(&mut self) -> Result<()> {
            let buffered = self.buffer().len();
            self.consume(buffered);
            Ok(())
        }
    }

    #[test]
    fn parse_plain_frame() {
        assert_eq!(
            parse_frame("2048,1990\r\n"),
            Some(RawSample {
                voltage: 2048,
                current: 1990
            })
        );
    }

    #[test]
    fn parse_frame_with_spaces() {
        assert_eq!(
            parse_frame(" 12 , 4095 "),
            Some(RawSample {
                voltage: 12,
                current: 4095
            })
        );
    }

    #[test]
    fn malformed_frames_rejected() {
        assert_eq!(parse_frame("boot: rst:0x1"), None);
        assert_eq!(parse_frame("2048"), None);
        assert_eq!(parse_frame("2048,abc"), None);
        assert_eq!(parse_frame(""), None);
    }

    #[test]
    fn reader_skips_noise_lines() {
        let stream = "ets Jun  8 2016\r\nwaiting for download\r\n2000,2100\r\n2010,2090\r\n";
        let mut adc = SerialAdc::new(std::io::BufReader::new(stream.as_bytes()));
        assert_eq!(
            adc.read().unwrap(),
            RawSample {
                voltage: 2000,
                current: 2100
            }
        );
        assert_eq!(
            adc.read().unwrap(),
            RawSample {
                voltage: 2010,
                current: 2090
            }
        );
    }

    #[test]
    fn reader_reports_eof() {
        let mut adc = SerialAdc::new(std::io::BufReader::new("2000,2100\n".as_bytes()));
        assert!(adc.read().is_ok());
        assert!(adc.read().is_err());
    }

    #[test]
    fn window_start_skips_torn_frame() {
        let stream = "48,1990\n2050,2100\n";
        let mut adc = SerialAdc::new(BufReader::new(stream.as_bytes()));
        adc.begin_window().unwrap();
        assert_eq!(
            adc.read().unwrap(),
            RawSample {
                voltage: 2050,
                current: 2100
            }
        );
    }

    #[test]
    fn window_start_drops_queued_frames() {
        let stream = "2000,2100\n2010,2090\n2020,2080\n";
        // Small buffer: the first read leaves "2010,2" queued
        let mut adc = SerialAdc::new(BufReader::with_capacity(16, stream.as_bytes()));
        assert_eq!(adc.read().unwrap().voltage, 2000);
        adc.begin_window().unwrap();
        assert_eq!(
            adc.read().unwrap(),
            RawSample {
                voltage: 2020,
                current: 2080
            }
        );
    }

    #[test]
    fn window_start_on_closed_port_fails() {
        let mut adc = SerialAdc::new(BufReader::new("".as_bytes()));
        assert!(adc.begin_window().is_err());
    }

    #[test]
    fn reader_gives_up_on_endless_garbage() {
        let stream = "garbage\n".repeat(MAX_GARBAGE_LINES + 1);
        let mut adc = SerialAdc::new(std::io::BufReader::new(stream.as_bytes()));
        assert!(adc.read().is_err());
    }
}
