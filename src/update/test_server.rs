use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

/// Answer the first request with `response` verbatim; returns the base URL
pub(crate) fn serve_once(response: Vec<u8>) -> String {
    serve_after(response, Duration::ZERO)
}

/// Like `serve_once`, but sit on the request for `delay` first
pub(crate) fn serve_after(response: Vec<u8>, delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        while reader.read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
            if line == "\r\n" {
                break;
            }
            line.clear();
        }

        thread::sleep(delay);
        let mut stream = reader.into_inner();
        let _ = stream.write_all(&response);
        let _ = stream.flush();
    });

    format!("http://{}", addr)
}

pub(crate) fn http_response(status: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}
