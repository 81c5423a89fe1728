//! one conversation turn: user input in, assembled snapshots out.

use bevy::prelude::*;
use futures_lite::StreamExt;

use crate::assembler::StreamAssembler;
use crate::client::CompletionClient;
use crate::error::{ChatError, ERROR_MESSAGE};

#[derive(Debug)]
pub enum TurnOutcome {
    /// stream ended normally. `text` is `None` when nothing was emitted.
    Completed { text: Option<String>, fragments: usize },
    /// the turn was aborted; `ERROR_MESSAGE` has already been emitted.
    Failed { reason: ChatError },
}

impl TurnOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TurnOutcome::Failed { .. })
    }
}

/// drives a single turn against `client`.
///
/// every non-empty fragment produces one `emit` with the full response so
/// far. any failure (opening or mid-stream) emits `ERROR_MESSAGE` exactly
/// once and stops consuming the stream. nothing is retried.
pub async fn run_turn<C, F>(client: &C, input: &str, mut emit: F) -> TurnOutcome
where
    C: CompletionClient + ?Sized,
    F: FnMut(&str),
{
    let mut stream = match client.open_stream(input).await {
        Ok(stream) => stream,
        Err(reason) => return abort(reason, &mut emit),
    };

    let mut assembler = StreamAssembler::new();
    let mut fragments = 0;
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                if let Some(snapshot) = assembler.process(&fragment) {
                    fragments += 1;
                    emit(snapshot);
                }
            }
            Err(reason) => return abort(reason, &mut emit),
        }
    }

    let text = (!assembler.is_empty()).then(|| assembler.into_text());
    TurnOutcome::Completed { text, fragments }
}

fn abort<F: FnMut(&str)>(reason: ChatError, emit: &mut F) -> TurnOutcome {
    error!(target: "bevy_llm_chat", "Error during API call: {}", reason);
    emit(ERROR_MESSAGE);
    TurnOutcome::Failed { reason }
}
