//! Implements a two-state "pinger" task that drives the lag checks: it asks the main loop to send
//! a `PING` every `lag_check` interval, and signals a disconnect when no matching `PONG` arrived
//! within `lag_reconnect`.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

pub(crate) struct Pinger {
    snd_rst: mpsc::Sender<()>,
}

#[derive(Debug)]
pub(crate) enum Event {
    SendPing,
    Disconnect,
}

enum PingerState {
    /// Signal a "ping" on timeout. State moves to `ExpectPong`.
    SendPing,
    /// Signal a "disconnect" on timeout.
    ExpectPong,
}

async fn pinger_task(
    lag_check: Duration,
    lag_reconnect: Option<Duration>,
    rcv_rst: mpsc::Receiver<()>,
    snd_ev: mpsc::Sender<Event>,
) {
    let mut rcv_rst_fused = ReceiverStream::new(rcv_rst).fuse();
    let mut state = PingerState::SendPing;
    loop {
        let wait = match state {
            PingerState::SendPing => lag_check,
            // with lag_reconnect disabled we just keep pinging at the check interval
            PingerState::ExpectPong => lag_reconnect.unwrap_or(lag_check),
        };
        match timeout(wait, rcv_rst_fused.next()).await {
            Err(_) => match state {
                PingerState::SendPing => {
                    state = PingerState::ExpectPong;
                    if snd_ev.try_send(Event::SendPing).is_err() {
                        return;
                    }
                }
                PingerState::ExpectPong => {
                    if lag_reconnect.is_some() {
                        let _ = snd_ev.try_send(Event::Disconnect);
                        return;
                    }
                    if snd_ev.try_send(Event::SendPing).is_err() {
                        return;
                    }
                }
            },
            Ok(cmd) => match cmd {
                None => {
                    return;
                }
                Some(()) => {
                    state = PingerState::SendPing;
                }
            },
        }
    }
}

impl Pinger {
    /// `lag_reconnect = None` disables the forced disconnect.
    pub(crate) fn new(
        lag_check: Duration,
        lag_reconnect: Option<Duration>,
    ) -> (Pinger, mpsc::Receiver<Event>) {
        let (snd_ev, rcv_ev) = mpsc::channel(1);
        // No need for sending another "reset" when there's already one waiting to be processed
        let (snd_rst, rcv_rst) = mpsc::channel(1);
        tokio::task::spawn_local(pinger_task(lag_check, lag_reconnect, rcv_rst, snd_ev));
        (Pinger { snd_rst }, rcv_ev)
    }

    /// Called when the matching `PONG` arrives.
    pub(crate) fn reset(&mut self) {
        // Ignore errors: no need to send another "reset" when there's already one waiting to be
        // processed
        let _ = self.snd_rst.try_send(());
    }
}
