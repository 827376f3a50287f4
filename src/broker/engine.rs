//! The broker reactor (C3 state machine).
//!
//! Grounded on `bgpview_io_client_broker.c`'s `init_reactor` /
//! `bgpview_io_client_broker_run`: a single `tokio::select!` loop (the Rust
//! analogue of the czmq `zloop`) polling three input sources — the master
//! channel, the server dealer channel, and a heartbeat timer — plus the
//! sub channel when subscribed, and honouring a cancellation signal in
//! place of the original's process-wide interrupt flag. Method names below
//! (`handle_master_msg`, `handle_server_msg`, `handle_heartbeat_timer`,
//! `send_request`) mirror the original's static functions one-to-one.

use super::state::{BrokerState, ConnState};
use super::{BrokerMsg, MasterMsg};
use crate::config::BrokerConfig;
use crate::error::{BgpviewError, Result};
use crate::protocol::{self, Frame, MsgType, RequestMessage};
use crate::request_table::RequestRecord;
use crate::transport::{DealerChannel, Message, SubChannel};
use async_trait::async_trait;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Produces a fresh connection to the server on initial connect and on
/// every reconnect. The reference transport's connector simply hands back
/// the in-process channel pair it was built with; a networked transport
/// would actually redial here.
#[async_trait]
pub trait ServerConnector: Send {
    async fn connect(
        &mut self,
    ) -> Result<(Box<dyn DealerChannel>, Option<Box<dyn SubChannel>>)>;
}

/// The broker task. Owns its connection, its request table, and the master
/// channel endpoints; never shares any of this with the master task.
pub struct Broker {
    state: BrokerState,
    connector: Box<dyn ServerConnector>,
    dealer: Box<dyn DealerChannel>,
    sub: Option<Box<dyn SubChannel>>,
    master_rx: mpsc::Receiver<MasterMsg>,
    master_tx: mpsc::Sender<BrokerMsg>,
    cancel: watch::Receiver<bool>,
}

impl Broker {
    pub async fn new(
        config: BrokerConfig,
        mut connector: Box<dyn ServerConnector>,
        master_rx: mpsc::Receiver<MasterMsg>,
        master_tx: mpsc::Sender<BrokerMsg>,
        cancel: watch::Receiver<bool>,
    ) -> Result<Self> {
        let (dealer, sub) = connector.connect().await?;
        let state = BrokerState::new(config);
        let mut broker = Broker {
            state,
            connector,
            dealer,
            sub,
            master_rx,
            master_tx,
            cancel,
        };
        broker.send_ready().await?;
        broker.state.conn_state = ConnState::Ready;
        Ok(broker)
    }

    async fn send_ready(&mut self) -> Result<()> {
        let frame = protocol::encode_ready(self.state.config.interests, self.state.config.intents.0);
        self.dealer.send(vec![frame]).await?;
        info!(identity = %self.state.identity, "sent READY");
        Ok(())
    }

    /// Run the reactor until shutdown or a fatal error. Mirrors
    /// `bgpview_io_client_broker_run`'s top-level loop.
    pub async fn run(mut self) -> Result<()> {
        let heartbeat_interval = self.state.config.heartbeat_interval;
        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        heartbeat_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if self.state.conn_state == ConnState::Exited {
                return Ok(());
            }
            if self.state.conn_state == ConnState::ShuttingDown
                && (self.state.requests.req_count() == 0
                    || self.state.shutdown_deadline_passed(Instant::now()))
            {
                self.finish_shutdown().await?;
                return Ok(());
            }

            let master_paused = self.state.master_paused;

            tokio::select! {
                biased;

                _ = self.cancel.changed() => {
                    if *self.cancel.borrow() {
                        info!("cancellation requested");
                        self.state.enter_shutdown();
                    }
                }

                changed = Self::recv_master(master_paused, &mut self.master_rx) => {
                    if let Some(msg) = changed {
                        self.handle_master_msg(msg).await?;
                    } else if !master_paused {
                        info!("master channel closed");
                        self.state.enter_shutdown();
                    }
                }

                result = self.dealer.recv() => {
                    match result {
                        Ok(Some(message)) => self.handle_server_msg(message).await?,
                        Ok(None) => {
                            return Err(BgpviewError::Transport("dealer channel closed".into()));
                        }
                        Err(e) => return Err(e),
                    }
                }

                result = Self::recv_sub(&mut self.sub) => {
                    if let Some(result) = result {
                        self.handle_sub_msg(result?).await?;
                    }
                }

                _ = heartbeat_timer.tick() => {
                    self.handle_heartbeat_timer().await?;
                }
            }

            self.handle_timeouts(Instant::now()).await?;
            self.sync_rate_limit();

            if self.state.conn_state == ConnState::Degraded {
                self.reconnect().await?;
            }
        }
    }

    async fn recv_master(
        paused: bool,
        rx: &mut mpsc::Receiver<MasterMsg>,
    ) -> Option<MasterMsg> {
        if paused {
            std::future::pending().await
        } else {
            rx.recv().await
        }
    }

    async fn recv_sub(sub: &mut Option<Box<dyn SubChannel>>) -> Option<Result<Message>> {
        match sub {
            Some(channel) => match channel.recv().await {
                Ok(Some(message)) => Some(Ok(message)),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            },
            None => std::future::pending().await,
        }
    }

    async fn handle_master_msg(&mut self, msg: MasterMsg) -> Result<()> {
        match msg {
            MasterMsg::PublishView(payload) => self.send_request(payload).await,
            MasterMsg::Shutdown => {
                self.state.enter_shutdown();
                Ok(())
            }
        }
    }

    /// Mirrors `send_request`: allocate a sequence number, build the
    /// request frame, send it, and record it in the request table keyed by
    /// sequence number.
    async fn send_request(&mut self, payload: Vec<Frame>) -> Result<()> {
        let idx = self
            .state
            .requests
            .find_empty()
            .ok_or_else(|| BgpviewError::Protocol("request table full despite rate limit".into()))?;
        let seq_num = self.state.take_seq_num();
        let message = RequestMessage {
            msg_type: MsgType::View,
            interests: self.state.config.interests,
            intents: self.state.config.intents.0,
            seq_num,
            payload: payload.clone(),
        };
        self.dealer.send(message.encode()).await?;
        let retry_at = Instant::now() + self.state.config.request_timeout;
        self.state.requests.occupy(
            idx,
            RequestRecord {
                in_use: false,
                seq_num,
                msg_type: MsgType::View,
                msg_frames: payload,
                retries_remaining: self.state.config.request_retries,
                retry_at,
            },
        );
        debug!(seq_num, "sent VIEW request");
        Ok(())
    }

    /// Mirrors `handle_server_msg`'s greedy-drain loop: process up to
    /// `greedy_max_msg` server messages before yielding back to the select.
    async fn handle_server_msg(&mut self, first: Message) -> Result<()> {
        self.process_server_message(first).await?;
        let mut drained = 1;
        while drained < self.state.config.greedy_max_msg {
            match self.dealer.try_recv()? {
                Some(message) => {
                    self.process_server_message(message).await?;
                    drained += 1;
                }
                None => break,
            }
        }
        Ok(())
    }

    async fn process_server_message(&mut self, message: Message) -> Result<()> {
        let header = message
            .first()
            .ok_or_else(|| BgpviewError::Protocol("empty server message".into()))?;
        let msg_type = protocol::decode_bare(header).or_else(|_| {
            header
                .first()
                .copied()
                .map(|_| MsgType::Reply)
                .ok_or_else(|| BgpviewError::Protocol("empty server frame".into()))
        })?;

        match msg_type {
            MsgType::Reply => {
                let reply = protocol::ReplyMessage::decode(header)?;
                self.state.reset_liveness();
                if let Some(idx) = self.state.requests.find_by_seq(reply.seq_num) {
                    self.state.requests.mark_unused(idx);
                    debug!(seq_num = reply.seq_num, "request acked");
                } else {
                    warn!(seq_num = reply.seq_num, "reply for unknown or already-acked request");
                }
                Ok(())
            }
            MsgType::Heartbeat => {
                self.state.reset_liveness();
                Ok(())
            }
            other => Err(BgpviewError::Protocol(format!(
                "unexpected message type from server: {other:?}"
            ))),
        }
    }

    async fn handle_sub_msg(&mut self, message: Message) -> Result<()> {
        let (interests, payload) = protocol::decode_sub_message(&message)?;
        self.state.reset_liveness();
        self.master_tx
            .send(BrokerMsg::View { interests, payload })
            .await
            .map_err(|_| BgpviewError::Transport("master channel closed".into()))
    }

    /// Mirrors `handle_heartbeat_timer`: send a heartbeat, then decrement
    /// liveness as if this tick had no intervening traffic (any traffic
    /// received this tick already reset liveness above, so this is safe).
    async fn handle_heartbeat_timer(&mut self) -> Result<()> {
        let frame = protocol::encode_bare(MsgType::Heartbeat);
        self.dealer.send(vec![frame]).await?;
        self.state.heartbeat_next = Instant::now() + self.state.config.heartbeat_interval;
        if self.state.conn_state == ConnState::Live || self.state.conn_state == ConnState::Ready {
            let degraded = self.state.tick_heartbeat_liveness();
            if degraded {
                warn!("heartbeat liveness exhausted, connection degraded");
            }
        }
        Ok(())
    }

    /// Mirrors `handle_timeouts`: resend or drop every request whose
    /// `retry_at` has passed.
    async fn handle_timeouts(&mut self, now: Instant) -> Result<()> {
        for idx in self.state.requests.expired(now) {
            let (seq_num, retries_remaining, payload) = {
                let record = self.state.requests.get(idx);
                (record.seq_num, record.retries_remaining, record.msg_frames.clone())
            };
            if retries_remaining == 0 {
                self.state.requests.mark_unused(idx);
                warn!(seq_num, "request dropped after exhausting retries");
                continue;
            }
            let message = RequestMessage {
                msg_type: MsgType::View,
                interests: self.state.config.interests,
                intents: self.state.config.intents.0,
                seq_num,
                payload: payload.clone(),
            };
            self.dealer.send(message.encode()).await?;
            let record = self.state.requests.get_mut(idx);
            record.retries_remaining -= 1;
            record.retry_at = now + self.state.config.request_timeout;
            debug!(seq_num, retries_remaining = record.retries_remaining, "retransmitted request");
        }
        Ok(())
    }

    /// Mirrors the rate-limiting invariant: pause/resume the master reader
    /// as `req_count` crosses `MAX_OUTSTANDING_REQ`.
    fn sync_rate_limit(&mut self) {
        let should_pause = self.state.should_pause_master();
        if should_pause != self.state.master_paused {
            self.state.master_paused = should_pause;
            if should_pause {
                debug!("request table full, pausing master reader");
            } else {
                debug!("request table has headroom, resuming master reader");
            }
        }
    }

    /// Mirrors the `DEGRADED -> RECONNECTING` transition: back off, reopen
    /// the connection, and resend `READY`.
    async fn reconnect(&mut self) -> Result<()> {
        self.state.conn_state = ConnState::Reconnecting;
        let wait = self.state.reconnect_interval_next;
        self.state.double_reconnect_interval();
        info!(?wait, "reconnecting after heartbeat timeout");
        tokio::time::sleep(wait).await;
        let (dealer, sub) = self.connector.connect().await?;
        self.dealer = dealer;
        self.sub = sub;
        self.send_ready().await?;
        self.state.conn_state = ConnState::Ready;
        Ok(())
    }

    async fn finish_shutdown(&mut self) -> Result<()> {
        let frame = protocol::encode_bare(MsgType::Term);
        let _ = self.dealer.send(vec![frame]).await;
        self.state.conn_state = ConnState::Exited;
        info!("broker exited cleanly");
        Ok(())
    }
}

/// Convenience entry point: build and run a broker to completion.
pub async fn run_broker(
    config: BrokerConfig,
    connector: Box<dyn ServerConnector>,
    master_rx: mpsc::Receiver<MasterMsg>,
    master_tx: mpsc::Sender<BrokerMsg>,
    cancel: watch::Receiver<bool>,
) -> Result<()> {
    let broker = Broker::new(config, connector, master_rx, master_tx, cancel).await?;
    broker.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ReplyMessage;
    use crate::transport::InProcessDealer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration as StdDuration;
    use tokio::sync::Mutex;

    /// A [`ServerConnector`] that hands out pre-built server-side dealer
    /// halves in order, one per `connect()` call, counting how many times
    /// it was invoked (initial connect plus every reconnect).
    struct ScriptedConnector {
        pending: Arc<Mutex<Vec<InProcessDealer>>>,
        connect_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ServerConnector for ScriptedConnector {
        async fn connect(&mut self) -> Result<(Box<dyn DealerChannel>, Option<Box<dyn SubChannel>>)> {
            self.connect_count.fetch_add(1, Ordering::SeqCst);
            let mut pending = self.pending.lock().await;
            let dealer = pending
                .pop()
                .ok_or_else(|| BgpviewError::Transport("scripted connector exhausted".into()))?;
            Ok((Box::new(dealer) as Box<dyn DealerChannel>, None))
        }
    }

    fn test_config() -> BrokerConfig {
        let mut cfg = BrokerConfig::default();
        cfg.heartbeat_interval = StdDuration::from_secs(30);
        cfg.request_timeout = StdDuration::from_secs(30);
        cfg.request_retries = 3;
        cfg.max_outstanding_requests = 4;
        cfg
    }

    async fn recv_server_request(server: &mut InProcessDealer) -> RequestMessage {
        let message = server.recv().await.unwrap().expect("server channel closed");
        RequestMessage::decode(&message).expect("decode request")
    }

    #[tokio::test]
    async fn happy_reply_acks_request_without_retransmit() {
        let (client_dealer, mut server_dealer) = InProcessDealer::pair(8);
        let connector = ScriptedConnector {
            pending: Arc::new(Mutex::new(vec![client_dealer])),
            connect_count: Arc::new(AtomicUsize::new(0)),
        };
        let (master_tx, master_rx) = mpsc::channel(8);
        let (broker_tx, _broker_rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let broker = Broker::new(test_config(), Box::new(connector), master_rx, broker_tx, cancel_rx)
            .await
            .unwrap();
        let handle = tokio::spawn(broker.run());

        // READY handshake.
        let ready = server_dealer.recv().await.unwrap().unwrap();
        assert_eq!(protocol::decode_bare(&ready[0]).unwrap(), MsgType::Ready);

        master_tx
            .send(MasterMsg::PublishView(vec![vec![1, 2, 3]]))
            .await
            .unwrap();
        let request = recv_server_request(&mut server_dealer).await;
        assert_eq!(request.msg_type, MsgType::View);

        server_dealer
            .send(vec![ReplyMessage { seq_num: request.seq_num }.encode()])
            .await
            .unwrap();

        // Give the broker a moment to process the ack, then shut down.
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();
        let result = tokio::time::timeout(StdDuration::from_secs(2), handle)
            .await
            .expect("broker did not exit")
            .expect("broker task panicked");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn request_is_retransmitted_once_before_being_acked() {
        let (client_dealer, mut server_dealer) = InProcessDealer::pair(8);
        let connector = ScriptedConnector {
            pending: Arc::new(Mutex::new(vec![client_dealer])),
            connect_count: Arc::new(AtomicUsize::new(0)),
        };
        let mut cfg = test_config();
        cfg.request_timeout = StdDuration::from_millis(80);
        let (master_tx, master_rx) = mpsc::channel(8);
        let (broker_tx, _broker_rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let broker = Broker::new(cfg, Box::new(connector), master_rx, broker_tx, cancel_rx)
            .await
            .unwrap();
        let handle = tokio::spawn(broker.run());

        let _ready = server_dealer.recv().await.unwrap().unwrap();

        master_tx
            .send(MasterMsg::PublishView(vec![vec![9]]))
            .await
            .unwrap();
        let first = recv_server_request(&mut server_dealer).await;
        // Deliberately don't reply: let the request timeout and retransmit.
        let retransmitted = recv_server_request(&mut server_dealer).await;
        assert_eq!(retransmitted.seq_num, first.seq_num);

        server_dealer
            .send(vec![ReplyMessage { seq_num: retransmitted.seq_num }.encode()])
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();
        let result = tokio::time::timeout(StdDuration::from_secs(2), handle)
            .await
            .expect("broker did not exit")
            .expect("broker task panicked");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn heartbeat_timeout_triggers_reconnect_through_the_connector() {
        let (first_client, _first_server) = InProcessDealer::pair(8);
        let (second_client, mut second_server) = InProcessDealer::pair(8);
        let connect_count = Arc::new(AtomicUsize::new(0));
        // `pending` is popped from the back, so push in reverse connect order.
        let connector = ScriptedConnector {
            pending: Arc::new(Mutex::new(vec![second_client, first_client])),
            connect_count: connect_count.clone(),
        };
        let mut cfg = test_config();
        cfg.heartbeat_interval = StdDuration::from_millis(30);
        cfg.heartbeat_liveness = 1;
        cfg.reconnect_interval_min = StdDuration::from_millis(10);
        cfg.reconnect_interval_max = StdDuration::from_millis(10);
        let (_master_tx, master_rx) = mpsc::channel(8);
        let (broker_tx, _broker_rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let broker = Broker::new(cfg, Box::new(connector), master_rx, broker_tx, cancel_rx)
            .await
            .unwrap();
        let handle = tokio::spawn(broker.run());

        // The second connection's READY frame only arrives after a
        // reconnect, proving the heartbeat-liveness-exhausted path drove it.
        let ready = tokio::time::timeout(StdDuration::from_secs(2), second_server.recv())
            .await
            .expect("no reconnect observed")
            .unwrap()
            .unwrap();
        assert_eq!(protocol::decode_bare(&ready[0]).unwrap(), MsgType::Ready);
        assert_eq!(connect_count.load(Ordering::SeqCst), 2);

        cancel_tx.send(true).unwrap();
        let result = tokio::time::timeout(StdDuration::from_secs(2), handle)
            .await
            .expect("broker did not exit")
            .expect("broker task panicked");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rate_limit_pauses_master_reader_until_a_reply_frees_a_slot() {
        let (client_dealer, mut server_dealer) = InProcessDealer::pair(8);
        let connector = ScriptedConnector {
            pending: Arc::new(Mutex::new(vec![client_dealer])),
            connect_count: Arc::new(AtomicUsize::new(0)),
        };
        let mut cfg = test_config();
        cfg.max_outstanding_requests = 1;
        cfg.shutdown_linger = StdDuration::from_millis(100);
        let (master_tx, master_rx) = mpsc::channel(8);
        let (broker_tx, _broker_rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let broker = Broker::new(cfg, Box::new(connector), master_rx, broker_tx, cancel_rx)
            .await
            .unwrap();
        let handle = tokio::spawn(broker.run());

        let _ready = server_dealer.recv().await.unwrap().unwrap();

        master_tx
            .send(MasterMsg::PublishView(vec![vec![1]]))
            .await
            .unwrap();
        master_tx
            .send(MasterMsg::PublishView(vec![vec![2]]))
            .await
            .unwrap();

        let first = recv_server_request(&mut server_dealer).await;
        // The second publish must not reach the server while the table is
        // full: only one request frame shows up within this window.
        let second = tokio::time::timeout(
            StdDuration::from_millis(150),
            recv_server_request(&mut server_dealer),
        )
        .await;
        assert!(second.is_err(), "second request was sent while rate-limited");

        server_dealer
            .send(vec![ReplyMessage { seq_num: first.seq_num }.encode()])
            .await
            .unwrap();
        let second = recv_server_request(&mut server_dealer).await;
        assert_ne!(second.seq_num, first.seq_num);

        cancel_tx.send(true).unwrap();
        let result = tokio::time::timeout(StdDuration::from_secs(2), handle)
            .await
            .expect("broker did not exit")
            .expect("broker task panicked");
        assert!(result.is_ok());
    }
}
