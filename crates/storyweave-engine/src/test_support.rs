use std::io::{BufRead, BufReader, Cursor, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub(crate) fn png_bytes(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
    encode_test_image(width, height, ImageFormat::Png)
}

pub(crate) fn jpeg_bytes(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
    encode_test_image(width, height, ImageFormat::Jpeg)
}

fn encode_test_image(width: u32, height: u32, format: ImageFormat) -> anyhow::Result<Vec<u8>> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 40 % 256) as u8, (y * 60 % 256) as u8, 128])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image).write_to(&mut out, format)?;
    Ok(out.into_inner())
}

pub(crate) fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> anyhow::Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        writer.start_file(*name, SimpleFileOptions::default())?;
        writer.write_all(bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// One-shot HTTP listener: accepts a single request, answers with a canned
/// response and hands the raw request text back through `request()`.
pub(crate) struct StubServer {
    pub url: String,
    handle: JoinHandle<anyhow::Result<String>>,
}

impl StubServer {
    pub(crate) fn request(self) -> anyhow::Result<String> {
        self.handle
            .join()
            .map_err(|_| anyhow::anyhow!("stub server thread panicked"))?
    }
}

pub(crate) fn serve_once(status: u16, body: &str) -> anyhow::Result<StubServer> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let url = format!("http://{}", listener.local_addr()?);
    let body = body.to_string();
    let handle = thread::spawn(move || -> anyhow::Result<String> {
        let (stream, _) = listener.accept()?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        let mut reader = BufReader::new(stream.try_clone()?);

        let mut head = String::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                if key.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
            let end_of_head = line == "\r\n";
            head.push_str(&line);
            if end_of_head {
                break;
            }
        }
        let mut request_body = vec![0u8; content_length];
        reader.read_exact(&mut request_body)?;

        let reason = if (200..300).contains(&status) { "OK" } else { "Error" };
        let response = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let mut stream = stream;
        stream.write_all(response.as_bytes())?;
        stream.flush()?;

        Ok(head + &String::from_utf8_lossy(&request_body))
    });
    Ok(StubServer { url, handle })
}

/// URL of a port nothing listens on.
pub(crate) fn closed_port_url() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}

pub(crate) fn request_json_body(raw: &str) -> anyhow::Result<serde_json::Value> {
    let body = raw
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or_default();
    Ok(serde_json::from_str(body)?)
}
