//! Event source replaying fixed texts, for tests.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Mutex;

use super::{EventSource, EventStream};
use crate::error::{Error, Result};
use crate::models::VoteEvent;

pub struct ScriptedSource {
    texts: Vec<String>,
    // keep the connection open after the script, like a quiet live stream
    hold_open: bool,
    // replay the script forever instead of once
    endless: bool,
    refuse: bool,
    opened: Mutex<Vec<Vec<String>>>,
}

impl ScriptedSource {
    pub fn holding_open(texts: &[&str]) -> Self {
        Self::build(texts, true, false, false)
    }

    pub fn closing(texts: &[&str]) -> Self {
        Self::build(texts, false, false, false)
    }

    /// Delivers `texts` over and over without pause.
    pub fn endless(texts: &[&str]) -> Self {
        Self::build(texts, false, true, false)
    }

    pub fn refusing() -> Self {
        Self::build(&[], false, false, true)
    }

    fn build(texts: &[&str], hold_open: bool, endless: bool, refuse: bool) -> Self {
        Self {
            texts: texts.iter().map(|t| t.to_string()).collect(),
            hold_open,
            endless,
            refuse,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Keywords passed to each `open`, in order.
    pub fn opened(&self) -> Vec<Vec<String>> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn open(&self, keywords: &[String]) -> Result<EventStream> {
        self.opened.lock().unwrap().push(keywords.to_vec());
        if self.refuse {
            return Err(Error::Store("stream refused".to_string()));
        }

        let events: Vec<Result<VoteEvent>> = self
            .texts
            .iter()
            .map(|text| Ok(VoteEvent { text: text.clone() }))
            .collect();
        let script = stream::iter(events);

        if self.endless {
            let texts = self.texts.clone();
            Ok(stream::iter(texts)
                .cycle()
                .map(|text| Ok::<_, Error>(VoteEvent { text }))
                .boxed())
        } else if self.hold_open {
            Ok(script.chain(stream::pending()).boxed())
        } else {
            Ok(script.boxed())
        }
    }
}
