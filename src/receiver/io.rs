/*
 * grelay - SMTP to Microsoft Graph relay
 * Copyright (C) 2026 The grelay Authors
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

/// CRLF-framed line reading over any async stream.
///
/// Bytes that are not valid utf8 are replaced instead of failing the read;
/// what clients put in DATA is their business, the protocol machine only
/// needs to see the line structure.
#[derive(Debug)]
pub struct AbstractIO<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    ///
    pub inner: S,
    buf: Vec<u8>,
}

macro_rules! ready {
    ($e:expr) => {
        match $e {
            std::task::Poll::Ready(t) => t,
            std::task::Poll::Pending => {
                return std::task::Poll::Pending;
            }
        }
    };
}

impl<S> tokio::io::AsyncRead for AbstractIO<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        std::pin::Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

const BUFFER_SIZE: usize = 1024;
const NEEDLE: &[u8] = b"\r\n";

impl<S> AbstractIO<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    ///
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buf: Vec::new(),
        }
    }

    /// the next CRLF-terminated line, without its terminator, or `None` on
    /// a cleanly closed stream.
    ///
    /// # Errors
    ///
    /// * the deadline elapsed (`std::io::ErrorKind::TimedOut`)
    /// * the underlying stream failed
    pub async fn next_line(
        &mut self,
        timeout: std::time::Duration,
    ) -> std::io::Result<Option<String>> {
        tokio::time::timeout(timeout, self)
            .await
            .map_err(|t| std::io::Error::new(std::io::ErrorKind::TimedOut, t))?
    }
}

impl<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin> tokio::io::AsyncBufRead
    for AbstractIO<S>
{
    fn poll_fill_buf(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<&[u8]>> {
        if self.as_mut().buf.is_empty() {
            let mut raw = vec![0; BUFFER_SIZE];
            let mut buf = tokio::io::ReadBuf::new(&mut raw);
            ready!(tokio::io::AsyncRead::poll_read(self.as_mut(), cx, &mut buf))?;
            self.as_mut().buf = buf.filled().to_vec();
        }
        std::task::Poll::Ready(Ok(&self.get_mut().buf))
    }

    fn consume(mut self: std::pin::Pin<&mut Self>, amt: usize) {
        self.buf = self.buf[amt..].to_vec();
    }
}

impl<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin> std::future::Future
    for AbstractIO<S>
{
    type Output = std::io::Result<Option<String>>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let mut output = vec![];
        loop {
            let available = ready!(tokio::io::AsyncBufRead::poll_fill_buf(self.as_mut(), cx))?;
            if available.is_empty() {
                return std::task::Poll::Ready(Ok(if output.is_empty() {
                    None
                } else {
                    // stream closed mid-line, surface what we have
                    Some(String::from_utf8_lossy(&output).into_owned())
                }));
            }

            if let Some(i) = available
                .windows(NEEDLE.len())
                .position(|window| window == NEEDLE)
            {
                output.extend_from_slice(&available[..i]);
                tokio::io::AsyncBufReadExt::consume(&mut self.as_mut(), i + NEEDLE.len());

                return std::task::Poll::Ready(Ok(Some(
                    String::from_utf8_lossy(&output).into_owned(),
                )));
            }
            let len = available.len();
            output.extend_from_slice(available);
            tokio::io::AsyncBufReadExt::consume(&mut self.as_mut(), len);
        }
    }
}
