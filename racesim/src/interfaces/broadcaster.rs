use crate::core::racer::ProgressEvent;
use crate::interfaces::messages::RaceMessage;
use crate::post::race_result::RaceOutcome;
use flume::Sender;
use log::debug;
use std::io::Write;

/// Result of a delivery attempt. Delivery problems are not errors for the race, they only tell
/// the race to stop talking to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Unavailable,
}

impl Delivery {
    pub fn is_delivered(self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// Broadcaster delivers the updates of one race to exactly one observer.
pub trait Broadcaster {
    /// send_progress delivers one progress update on a best-effort basis.
    fn send_progress(&mut self, event: &ProgressEvent) -> Delivery;

    /// send_final delivers the terminal message and closes the transport afterwards.
    fn send_final(&mut self, outcome: &RaceOutcome) -> Delivery;
}

impl<B: Broadcaster + ?Sized> Broadcaster for &mut B {
    fn send_progress(&mut self, event: &ProgressEvent) -> Delivery {
        (**self).send_progress(event)
    }

    fn send_final(&mut self, outcome: &RaceOutcome) -> Delivery {
        (**self).send_final(outcome)
    }
}

impl<B: Broadcaster + ?Sized> Broadcaster for Box<B> {
    fn send_progress(&mut self, event: &ProgressEvent) -> Delivery {
        (**self).send_progress(event)
    }

    fn send_final(&mut self, outcome: &RaceOutcome) -> Delivery {
        (**self).send_final(outcome)
    }
}

/// ChannelBroadcaster hands the messages to an observer running on another thread. The sender
/// is dropped after the final message, which ends the observer's receive loop.
#[derive(Debug)]
pub struct ChannelBroadcaster {
    tx: Option<Sender<RaceMessage>>,
}

impl ChannelBroadcaster {
    pub fn new(tx: Sender<RaceMessage>) -> ChannelBroadcaster {
        ChannelBroadcaster { tx: Some(tx) }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    fn send(&mut self, msg: RaceMessage) -> Delivery {
        let delivered = match &self.tx {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        };
        if !delivered {
            self.tx = None;
            return Delivery::Unavailable;
        }
        Delivery::Delivered
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn send_progress(&mut self, event: &ProgressEvent) -> Delivery {
        self.send(RaceMessage::progress(event))
    }

    fn send_final(&mut self, outcome: &RaceOutcome) -> Delivery {
        let delivery = self.send(RaceMessage::final_outcome(outcome));
        self.tx = None;
        delivery
    }
}

/// WriterBroadcaster writes every message as one line of JSON.
#[derive(Debug)]
pub struct WriterBroadcaster<W: Write> {
    writer: W,
    closed: bool,
}

impl<W: Write> WriterBroadcaster<W> {
    pub fn new(writer: W) -> WriterBroadcaster<W> {
        WriterBroadcaster {
            writer,
            closed: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, msg: &RaceMessage) -> Delivery {
        if self.closed {
            return Delivery::Unavailable;
        }
        let result = msg
            .to_json()
            .map_err(std::io::Error::from)
            .and_then(|mut line| {
                line.push('\n');
                self.writer.write_all(line.as_bytes())
            });
        match result {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                debug!("Writing race message failed: {}", e);
                self.closed = true;
                Delivery::Unavailable
            }
        }
    }
}

impl<W: Write> Broadcaster for WriterBroadcaster<W> {
    fn send_progress(&mut self, event: &ProgressEvent) -> Delivery {
        self.write_line(&RaceMessage::progress(event))
    }

    fn send_final(&mut self, outcome: &RaceOutcome) -> Delivery {
        let mut delivery = self.write_line(&RaceMessage::final_outcome(outcome));
        if delivery.is_delivered() && self.writer.flush().is_err() {
            delivery = Delivery::Unavailable;
        }
        self.closed = true;
        delivery
    }
}
