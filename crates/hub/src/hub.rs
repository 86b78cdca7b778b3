//! The coordinating loop that owns observer and subscription state.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wharf_protocol::envelope::Envelope;
use wharf_protocol::types::{JobState, JobUpdate};
use wharf_protocol::MessageType;

use crate::connection::Sender;

/// Identifier of one observer connection.
pub(crate) type ConnId = u64;

pub(crate) enum Command {
    Register { conn_id: ConnId, sender: Sender },
    Unregister { conn_id: ConnId },
    Subscribe { conn_id: ConnId, job_id: String },
    Unsubscribe { conn_id: ConnId, job_id: String },
    Publish { update: JobUpdate },
}

/// Cloneable handle for talking to the hub loop.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl HubHandle {
    pub(crate) fn register(&self, conn_id: ConnId, sender: Sender) {
        let _ = self.tx.send(Command::Register { conn_id, sender });
    }

    pub(crate) fn unregister(&self, conn_id: ConnId) {
        let _ = self.tx.send(Command::Unregister { conn_id });
    }

    pub(crate) fn subscribe(&self, conn_id: ConnId, job_id: String) {
        let _ = self.tx.send(Command::Subscribe { conn_id, job_id });
    }

    pub(crate) fn unsubscribe(&self, conn_id: ConnId, job_id: String) {
        let _ = self.tx.send(Command::Unsubscribe { conn_id, job_id });
    }

    /// Queues a job update for fan-out.
    pub fn publish(&self, update: JobUpdate) {
        let _ = self.tx.send(Command::Publish { update });
    }

    /// Adapter for the job scheduler's publisher callback.
    pub fn publisher(&self) -> Box<dyn Fn(JobUpdate) + Send + Sync> {
        let handle = self.clone();
        Box::new(move |update| handle.publish(update))
    }

    /// Adapter for the transfer store's completion callback: a
    /// finished upload surfaces as a terminal job-like event so the UI
    /// refreshes the affected directory.
    pub fn upload_completion(&self) -> Box<dyn Fn(&str, &str) + Send + Sync> {
        let handle = self.clone();
        Box::new(move |upload_id, _dest| {
            handle.publish(JobUpdate {
                job_id: format!("upload:{upload_id}"),
                state: JobState::Completed,
                progress: 100,
                error: None,
            });
        })
    }
}

/// The notification hub. Spawns its loop on creation; all state lives
/// inside the loop task.
pub struct Hub;

impl Hub {
    /// Starts the hub loop and returns its handle. The loop runs until
    /// `cancel` fires.
    pub fn spawn(cancel: CancellationToken) -> HubHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_loop(rx, cancel));
        HubHandle { tx }
    }
}

#[derive(Default)]
struct State {
    observers: HashMap<ConnId, Sender>,
    /// job id -> subscribed connections.
    subscribers: HashMap<String, HashSet<ConnId>>,
    /// connection -> subscribed jobs, for cleanup on unregister.
    memberships: HashMap<ConnId, HashSet<String>>,
}

impl State {
    fn apply(&mut self, command: Command) {
        match command {
            Command::Register { conn_id, sender } => {
                self.observers.insert(conn_id, sender);
                tracing::debug!(conn_id, observers = self.observers.len(), "observer registered");
            }
            Command::Unregister { conn_id } => {
                self.observers.remove(&conn_id);
                if let Some(jobs) = self.memberships.remove(&conn_id) {
                    for job_id in jobs {
                        if let Some(set) = self.subscribers.get_mut(&job_id) {
                            set.remove(&conn_id);
                            if set.is_empty() {
                                self.subscribers.remove(&job_id);
                            }
                        }
                    }
                }
                tracing::debug!(conn_id, observers = self.observers.len(), "observer unregistered");
            }
            Command::Subscribe { conn_id, job_id } => {
                if !self.observers.contains_key(&conn_id) {
                    return;
                }
                self.subscribers
                    .entry(job_id.clone())
                    .or_default()
                    .insert(conn_id);
                self.memberships.entry(conn_id).or_default().insert(job_id);
            }
            Command::Unsubscribe { conn_id, job_id } => {
                if let Some(set) = self.subscribers.get_mut(&job_id) {
                    set.remove(&conn_id);
                    if set.is_empty() {
                        self.subscribers.remove(&job_id);
                    }
                }
                if let Some(jobs) = self.memberships.get_mut(&conn_id) {
                    jobs.remove(&job_id);
                }
            }
            Command::Publish { update } => self.publish(update),
        }
    }

    fn publish(&mut self, update: JobUpdate) {
        let terminal = update.state.is_terminal();
        let msg_type = if terminal {
            MessageType::JobComplete
        } else {
            MessageType::JobUpdate
        };
        let envelope = match Envelope::new(msg_type, Some(&update)) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!("failed to encode job update: {e}");
                return;
            }
        };

        let targets: Vec<ConnId> = match self.subscribers.get(&update.job_id) {
            Some(set) if !set.is_empty() => set.iter().copied().collect(),
            // Best-effort global refresh when nobody subscribed.
            _ => {
                tracing::debug!(job_id = %update.job_id, "no subscribers, broadcasting");
                self.observers.keys().copied().collect()
            }
        };

        for conn_id in targets {
            if let Some(sender) = self.observers.get(&conn_id) {
                // A full buffer drops this message for this observer
                // only; the publisher and other observers never stall.
                if sender.send(envelope.clone()).is_err() {
                    tracing::warn!(conn_id, job_id = %update.job_id, "observer buffer full, dropping update");
                }
            }
        }

        // Terminal means no further updates for this job can ever
        // arrive; drop its subscription set.
        if terminal {
            if let Some(set) = self.subscribers.remove(&update.job_id) {
                for conn_id in set {
                    if let Some(jobs) = self.memberships.get_mut(&conn_id) {
                        jobs.remove(&update.job_id);
                    }
                }
            }
        }
    }
}

async fn run_loop(mut rx: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
    let mut state = State::default();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => state.apply(command),
                None => break,
            },
        }
    }
    tracing::info!("hub loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc::Receiver;

    fn observer(capacity: usize) -> (Sender, Receiver<Envelope>) {
        Sender::channel(capacity)
    }

    fn update(job_id: &str, state: JobState, progress: u8) -> JobUpdate {
        JobUpdate {
            job_id: job_id.into(),
            state,
            progress,
            error: None,
        }
    }

    async fn recv(rx: &mut Receiver<Envelope>) -> Envelope {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    async fn assert_empty(rx: &mut Receiver<Envelope>) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    async fn settle() {
        // Let the hub loop drain its command queue.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn subscribed_observer_gets_targeted_updates() {
        let hub = Hub::spawn(CancellationToken::new());
        let (s1, mut r1) = observer(8);
        let (s2, mut r2) = observer(8);
        hub.register(1, s1);
        hub.register(2, s2);
        hub.subscribe(1, "job-a".into());
        settle().await;

        hub.publish(update("job-a", JobState::Running, 40));

        let env = recv(&mut r1).await;
        assert_eq!(env.msg_type, MessageType::JobUpdate);
        let payload: JobUpdate = env.parse_payload().unwrap().unwrap();
        assert_eq!(payload.progress, 40);
        // Non-subscriber sees nothing when a subscriber exists.
        assert_empty(&mut r2).await;
    }

    #[tokio::test]
    async fn broadcast_fallback_without_subscribers() {
        let hub = Hub::spawn(CancellationToken::new());
        let (s1, mut r1) = observer(8);
        let (s2, mut r2) = observer(8);
        hub.register(1, s1);
        hub.register(2, s2);
        settle().await;

        hub.publish(update("job-x", JobState::Running, 10));

        assert_eq!(recv(&mut r1).await.msg_type, MessageType::JobUpdate);
        assert_eq!(recv(&mut r2).await.msg_type, MessageType::JobUpdate);
    }

    #[tokio::test]
    async fn terminal_update_maps_to_job_complete_and_clears_subscription() {
        let hub = Hub::spawn(CancellationToken::new());
        let (s1, mut r1) = observer(8);
        let (s2, mut r2) = observer(8);
        hub.register(1, s1);
        hub.register(2, s2);
        hub.subscribe(1, "job-a".into());
        settle().await;

        hub.publish(update("job-a", JobState::Completed, 100));

        let env = recv(&mut r1).await;
        assert_eq!(env.msg_type, MessageType::JobComplete);
        let payload: JobUpdate = env.parse_payload().unwrap().unwrap();
        assert_eq!(payload.state, JobState::Completed);
        assert_empty(&mut r2).await;

        // Subscription set dropped: the next publish for that id falls
        // back to broadcast.
        hub.publish(update("job-a", JobState::Running, 1));
        assert_eq!(recv(&mut r1).await.msg_type, MessageType::JobUpdate);
        assert_eq!(recv(&mut r2).await.msg_type, MessageType::JobUpdate);
    }

    #[tokio::test]
    async fn unregister_purges_subscriptions() {
        let hub = Hub::spawn(CancellationToken::new());
        let (s1, mut r1) = observer(8);
        let (s2, mut r2) = observer(8);
        hub.register(1, s1);
        hub.register(2, s2);
        hub.subscribe(1, "job-a".into());
        hub.unregister(1);
        settle().await;

        // Only observer 2 remains; publish broadcasts to it alone.
        hub.publish(update("job-a", JobState::Running, 5));
        assert_eq!(recv(&mut r2).await.msg_type, MessageType::JobUpdate);
        assert_empty(&mut r1).await;
    }

    #[tokio::test]
    async fn unsubscribe_restores_broadcast() {
        let hub = Hub::spawn(CancellationToken::new());
        let (s1, mut r1) = observer(8);
        hub.register(1, s1);
        hub.subscribe(1, "job-a".into());
        hub.unsubscribe(1, "job-a".into());
        settle().await;

        hub.publish(update("job-a", JobState::Running, 5));
        // Fallback broadcast still reaches the lone observer.
        assert_eq!(recv(&mut r1).await.msg_type, MessageType::JobUpdate);
    }

    #[tokio::test]
    async fn slow_observer_never_blocks_others() {
        let hub = Hub::spawn(CancellationToken::new());
        let (slow, mut slow_rx) = observer(1);
        let (fast, mut fast_rx) = observer(8);
        hub.register(1, slow);
        hub.register(2, fast);
        hub.subscribe(1, "job-a".into());
        hub.subscribe(2, "job-a".into());
        settle().await;

        // The slow observer's buffer holds one message; later ones are
        // dropped for it while the fast observer receives all three.
        for progress in [10, 20, 30] {
            hub.publish(update("job-a", JobState::Running, progress));
        }
        settle().await;

        let mut fast_count = 0;
        while fast_rx.try_recv().is_ok() {
            fast_count += 1;
        }
        assert_eq!(fast_count, 3);

        let mut slow_count = 0;
        while slow_rx.try_recv().is_ok() {
            slow_count += 1;
        }
        assert_eq!(slow_count, 1);
    }

    #[tokio::test]
    async fn per_job_order_preserved_per_connection() {
        let hub = Hub::spawn(CancellationToken::new());
        let (s1, mut r1) = observer(32);
        hub.register(1, s1);
        hub.subscribe(1, "job-a".into());
        settle().await;

        for progress in [5, 25, 50, 75] {
            hub.publish(update("job-a", JobState::Running, progress));
        }
        hub.publish(update("job-a", JobState::Completed, 100));
        settle().await;

        let mut seen = Vec::new();
        while let Ok(env) = r1.try_recv() {
            let payload: JobUpdate = env.parse_payload().unwrap().unwrap();
            seen.push(payload.progress);
        }
        assert_eq!(seen, vec![5, 25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn upload_completion_adapter_publishes_terminal_event() {
        let hub = Hub::spawn(CancellationToken::new());
        let (s1, mut r1) = observer(8);
        hub.register(1, s1);
        settle().await;

        let callback = hub.upload_completion();
        callback("u1", "/data/out.bin");

        let env = recv(&mut r1).await;
        assert_eq!(env.msg_type, MessageType::JobComplete);
        let payload: JobUpdate = env.parse_payload().unwrap().unwrap();
        assert_eq!(payload.job_id, "upload:u1");
        assert_eq!(payload.progress, 100);
    }
}
