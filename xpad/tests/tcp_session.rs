//! Two-channel behaviour against a loopback fake server: an exposure blocks
//! the command channel while another thread polls and aborts on the status
//! channel.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use xpad::{DetectorStatus, DeviceSession, ExposureOutcome, FrameHeader, SessionOptions};

fn frame(height: i32, width: i32, pixels: &[i32]) -> Vec<u8> {
    let payload: Vec<u8> = pixels.iter().flat_map(|p| p.to_le_bytes()).collect();
    let mut bytes = FrameHeader {
        size: payload.len() as i32,
        height,
        width,
    }
    .encode()
    .to_vec();
    bytes.extend(payload);
    bytes
}

/// Greet, then hand every received line to `handler` until it returns false
fn serve<F>(stream: TcpStream, mut handler: F)
where
    F: FnMut(&str, &mut TcpStream, &mut BufReader<TcpStream>) -> bool,
{
    let mut writer = stream;
    let mut reader = BufReader::new(writer.try_clone().unwrap());
    writer.write_all(b"Welcome to XPAD server>").unwrap();

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).unwrap() == 0 {
            return;
        }
        if !handler(line.trim_end(), &mut writer, &mut reader) {
            return;
        }
    }
}

fn expect_ok(reader: &mut BufReader<TcpStream>) {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert_eq!(line, "OK\n");
}

fn command_server(stream: TcpStream, acquiring: Arc<AtomicBool>, aborts: Receiver<()>) {
    serve(stream, |line, out, reader| {
        match line {
            "Init" => out.write_all(b"* 0>").unwrap(),
            "GetImageNumber" => out.write_all(b"* 3>").unwrap(),
            "StartExposure" => {
                acquiring.store(true, Ordering::SeqCst);
                out.write_all(&frame(2, 2, &[1, 2, 3, 4])).unwrap();
                expect_ok(reader);

                // Hold the exposure open until the status channel aborts it
                aborts.recv_timeout(Duration::from_secs(10)).unwrap();
                out.write_all(&FrameHeader { size: 0, height: 2, width: 2 }.encode())
                    .unwrap();
                expect_ok(reader);
                acquiring.store(false, Ordering::SeqCst);
                out.write_all(b"* 1>* 1>").unwrap();
            }
            "Exit" => return false,
            other => panic!("unexpected command {:?}", other),
        }
        true
    });
}

fn status_server(stream: TcpStream, acquiring: Arc<AtomicBool>, aborts: Sender<()>) {
    serve(stream, |line, out, _| {
        match line {
            "Init" => out.write_all(b"* 0>").unwrap(),
            "GetDetectorStatus" => {
                if acquiring.load(Ordering::SeqCst) {
                    out.write_all(b"* Acquiring.>").unwrap()
                } else {
                    out.write_all(b"* Idle.>").unwrap()
                }
            }
            "AbortCurrentProcess" => {
                aborts.send(()).unwrap();
                out.write_all(b"* 0>").unwrap();
            }
            "Exit" => return false,
            other => panic!("unexpected status command {:?}", other),
        }
        true
    });
}

#[test]
fn test_abort_from_status_channel_during_exposure() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let acquiring = Arc::new(AtomicBool::new(false));
    let (abort_tx, abort_rx) = bounded(1);

    let server = {
        let acquiring = Arc::clone(&acquiring);
        thread::spawn(move || {
            // The client opens the command channel first
            let (command, _) = listener.accept().unwrap();
            let command_acquiring = Arc::clone(&acquiring);
            let command = thread::spawn(move || command_server(command, command_acquiring, abort_rx));
            let (status, _) = listener.accept().unwrap();
            status_server(status, acquiring, abort_tx);
            command.join().unwrap();
        })
    };

    let mut session = DeviceSession::connect(addr, SessionOptions::default()).unwrap();
    session.init().unwrap();
    assert_eq!(session.get_detector_status(), DetectorStatus::Idle);

    let status = session.status_handle();
    let worker = thread::spawn(move || {
        let mut frames = Vec::new();
        let outcome = session.acquire(|index, frame| -> xpad::Result<()> {
            frames.push((index, frame.pixels().collect::<Vec<_>>()));
            Ok(())
        });
        (session, frames, outcome)
    });

    let mut started = false;
    for _ in 0..500 {
        if status.detector_status() == DetectorStatus::Acquiring {
            started = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(started, "exposure never reported as acquiring");

    status.abort().unwrap();

    let (session, frames, outcome) = worker.join().unwrap();
    assert_eq!(outcome.unwrap(), ExposureOutcome::Aborted);
    assert_eq!(frames, vec![(0, vec![1, 2, 3, 4])]);
    assert_eq!(session.last_frame_dimensions(), Some((2, 2)));
    assert_eq!(status.detector_status(), DetectorStatus::Idle);

    session.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_connect_refused_is_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    match DeviceSession::connect(addr, SessionOptions::default()) {
        Err(e) => assert!(e.is_connection()),
        Ok(_) => panic!("connected to a closed port"),
    }
}
