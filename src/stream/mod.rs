//! External event source: a keyword-filtered, long-lived HTTP stream of
//! newline-delimited JSON events.

#[cfg(test)]
pub(crate) mod scripted;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info};

use crate::error::{Error, Result};
use crate::models::VoteEvent;

/// An open connection. Dropping it closes the connection.
pub type EventStream = BoxStream<'static, Result<VoteEvent>>;

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Opens a stream delivering only events that mention one of `keywords`.
    async fn open(&self, keywords: &[String]) -> Result<EventStream>;
}

pub struct HttpEventSource {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpEventSource {
    pub fn new(url: impl Into<String>, bearer_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("trusty-tally/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            bearer_token,
        })
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn open(&self, keywords: &[String]) -> Result<EventStream> {
        let track = keywords.join(",");
        info!("Opening event stream {} tracking {} keyword(s)", self.url, keywords.len());

        let mut request = self.client.post(&self.url).form(&[("track", track.as_str())]);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?.error_for_status()?;

        let events = split_lines(response.bytes_stream())
            .filter_map(|line| async move {
                match line {
                    Ok(line) => decode_event(&line).map(Ok),
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed();

        Ok(events)
    }
}

/// Re-chunks a byte stream into lines, without the trailing newline.
/// A final line without a newline is still yielded; an error ends the stream.
fn split_lines<S, B, E>(body: S) -> impl futures::Stream<Item = Result<Vec<u8>>> + Send + 'static
where
    S: futures::Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    stream::unfold((Box::pin(body), Vec::new(), false), |(mut body, mut buf, mut done)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = buf.drain(..=pos).collect();
                line.pop();
                return Some((Ok(line), (body, buf, done)));
            }
            if done {
                if buf.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut buf);
                return Some((Ok(rest), (body, buf, done)));
            }
            match body.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => return Some((Err(e.into()), (body, Vec::new(), true))),
                None => done = true,
            }
        }
    })
}

/// Parses one stream line. Keep-alive blank lines and anything that is not
/// an event with text are skipped.
pub fn decode_event(line: &[u8]) -> Option<VoteEvent> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_slice::<VoteEvent>(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Skipping undecodable stream line: {}", e);
            None
        }
    }
}
