//! Per-worker output coalescer: within an `output_interval` window, repeated
//! `runner_output` events collapse to the newest one; any non-`runner_output`
//! event, or window close, flushes the buffered value. A pass-through in
//! verbose mode.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::contracts::{Event, EventType};

pub struct Coalescer {
    interval: Duration,
    verbose: bool,
}

impl Coalescer {
    pub fn new(interval: Duration, verbose: bool) -> Self {
        Self { interval, verbose }
    }

    /// Consumes `input`, forwarding coalesced events to `output` until
    /// `input` closes (after which any buffered value is flushed).
    pub async fn run(self, mut input: mpsc::Receiver<Event>, output: mpsc::Sender<Event>) {
        if self.verbose {
            while let Some(event) = input.recv().await {
                if output.send(event).await.is_err() {
                    return;
                }
            }
            return;
        }

        let mut pending: Option<Event> = None;
        let mut window_start = Instant::now();

        loop {
            let remaining = self.interval.saturating_sub(window_start.elapsed());
            tokio::select! {
                biased;
                maybe_event = input.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if event.event_type == EventType::RunnerOutput {
                                if pending.is_none() {
                                    window_start = Instant::now();
                                }
                                pending = Some(event);
                            } else {
                                if let Some(buffered) = pending.take() {
                                    if output.send(buffered).await.is_err() {
                                        return;
                                    }
                                }
                                if output.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        None => {
                            if let Some(buffered) = pending.take() {
                                let _ = output.send(buffered).await;
                            }
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep(remaining), if pending.is_some() => {
                    if let Some(buffered) = pending.take() {
                        if output.send(buffered).await.is_err() {
                            return;
                        }
                    }
                    window_start = Instant::now();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_event(message: &str) -> Event {
        Event::new(EventType::RunnerOutput).with_message(message)
    }

    #[tokio::test]
    async fn collapses_repeated_output_within_window() {
        let (tx, rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let coalescer = Coalescer::new(Duration::from_millis(50), false);
        let handle = tokio::spawn(coalescer.run(rx, out_tx));

        for i in 0..5 {
            tx.send(output_event(&format!("line {i}"))).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let mut received = Vec::new();
        while let Some(e) = out_rx.recv().await {
            received.push(e);
        }
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message.as_deref(), Some("line 4"));
    }

    #[tokio::test]
    async fn flushes_on_non_output_event() {
        let (tx, rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let coalescer = Coalescer::new(Duration::from_secs(5), false);
        let handle = tokio::spawn(coalescer.run(rx, out_tx));

        tx.send(output_event("a")).await.unwrap();
        tx.send(output_event("b")).await.unwrap();
        tx.send(Event::new(EventType::RunnerFinished)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let mut received = Vec::new();
        while let Some(e) = out_rx.recv().await {
            received.push(e.event_type);
        }
        assert_eq!(received, vec![EventType::RunnerOutput, EventType::RunnerFinished]);
    }

    #[tokio::test]
    async fn verbose_mode_is_pass_through() {
        let (tx, rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let coalescer = Coalescer::new(Duration::from_secs(5), true);
        let handle = tokio::spawn(coalescer.run(rx, out_tx));

        for i in 0..3 {
            tx.send(output_event(&format!("line {i}"))).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let mut count = 0;
        while out_rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
