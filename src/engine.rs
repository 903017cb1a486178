//! Replication engine: the mutation API, a serialized push worker and an
//! ordered pull loop over one shared journal.
//!
//! Every mutation runs under a single gate (`Mutex<Core>`) and then enqueues a
//! push request. One worker thread drains the queue, folding every request
//! that is waiting into a single push, so pushes never race each other. Remote
//! notifications are forwarded into a channel and applied by one pull thread
//! in delivery order. The gate is never held across a remote call.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use rand::Rng;

use crate::auth::{AuthProvider, Identity};
use crate::error::{JournalError, Result};
use crate::journal::{factory_snapshot, Journal};
use crate::merge::{self, ImportChoice, SyncChoice};
use crate::models::{
    ensure_finite, Account, AccountField, BackupDocument, Payload, Snapshot, SyncStatus, Taxonomy, Trade,
};
use crate::remote::{Callback, RemoteDocs, Subscription};
use crate::settings::SyncConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Local data was empty, so the payload was applied directly.
    Applied,
    /// Local data exists; the payload waits for `resolve_import_conflict`.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Remote (when signed in) and local data were both reset.
    Complete { remote_wiped: bool },
    /// The remote wipe failed; only local data was cleared and the remote
    /// copy may still hold old data.
    LocalOnly { reason: String },
}

/// What the pull path decided for one remote notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PullDecision {
    PushInFlight,
    OwnEcho,
    Restored,
    Identical,
    TrailingEcho,
    Diverged,
    NoData,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct SyncState {
    status: SyncStatus,
    last_backup: Option<DateTime<Utc>>,
    conflict_open: bool,
    recent_writes: VecDeque<String>,
    write_seq: u64,
    device: String,
    epoch: u64,
}

impl SyncState {
    fn new() -> Self {
        let device: u32 = rand::thread_rng().gen();
        Self {
            status: SyncStatus::Offline,
            last_backup: None,
            conflict_open: false,
            recent_writes: VecDeque::new(),
            write_seq: 0,
            device: format!("{device:08x}"),
            epoch: 0,
        }
    }

    fn next_write_id(&mut self, memory: usize) -> String {
        self.write_seq += 1;
        let id = format!("{}-{}", self.device, self.write_seq);
        self.recent_writes.push_back(id.clone());
        while self.recent_writes.len() > memory.max(1) {
            self.recent_writes.pop_front();
        }
        id
    }

    fn is_own_write(&self, write_id: &str) -> bool {
        self.recent_writes.iter().any(|id| id == write_id)
    }

    /// Forget per-session sync history, as on sign-in or sign-out.
    fn forget_session(&mut self) {
        self.last_backup = None;
        self.conflict_open = false;
    }
}

struct Core {
    journal: Journal,
    sync: SyncState,
    pending_import: Option<Payload>,
    closed: bool,
}

impl Core {
    /// Classify a remote document against local state and act on it.
    fn apply_remote(&mut self, remote: &Payload, grace: Duration) -> PullDecision {
        if self.sync.status == SyncStatus::Saving {
            return PullDecision::PushInFlight;
        }

        if let Some(write_id) = remote.write_id.as_deref() {
            if self.sync.is_own_write(write_id) {
                if remote.trades.as_deref() == Some(self.journal.trades()) {
                    self.sync.status = SyncStatus::Synced;
                    if remote.last_updated.is_some() {
                        self.sync.last_backup = remote.last_updated;
                    }
                }
                return PullDecision::OwnEcho;
            }
        }

        let local_empty = self.journal.trades().is_empty();
        let Some(remote_trades) = remote.trades.as_deref() else {
            return PullDecision::NoData;
        };

        if local_empty {
            if remote_trades.is_empty() {
                return PullDecision::NoData;
            }
            merge::adopt_remote(&mut self.journal, remote);
            self.sync.status = SyncStatus::Synced;
            self.sync.last_backup = remote.last_updated;
            return PullDecision::Restored;
        }

        if remote_trades == self.journal.trades() {
            self.sync.status = SyncStatus::Synced;
            if remote.last_updated.is_some() {
                self.sync.last_backup = remote.last_updated;
            }
            return PullDecision::Identical;
        }

        let genuine = match (self.sync.last_backup, remote.last_updated) {
            (None, _) => true,
            (Some(local_at), Some(remote_at)) => {
                (remote_at - local_at).num_milliseconds() > grace.as_millis() as i64
            }
            (Some(_), None) => false,
        };
        if genuine {
            self.sync.conflict_open = true;
            PullDecision::Diverged
        } else {
            self.sync.status = SyncStatus::Synced;
            if remote.last_updated.is_some() {
                self.sync.last_backup = remote.last_updated;
            }
            PullDecision::TrailingEcho
        }
    }
}

/// Counts queued work so callers can wait for the engine to go quiet.
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    changed: Condvar,
}

impl Pending {
    fn add(&self, n: usize) {
        *self.count.lock().unwrap_or_else(|p| p.into_inner()) += n;
    }

    fn done(&self, n: usize) {
        let mut count = self.count.lock().unwrap_or_else(|p| p.into_inner());
        *count = count.saturating_sub(n);
        if *count == 0 {
            self.changed.notify_all();
        }
    }

    fn wait_zero(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap_or_else(|p| p.into_inner());
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = match self.changed.wait_timeout(count, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

struct Shared {
    gate: Mutex<Core>,
    remote: Arc<dyn RemoteDocs>,
    auth: Arc<dyn AuthProvider>,
    config: SyncConfig,
    pending: Arc<Pending>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn online_identity(&self) -> Option<Identity> {
        self.auth.state().online_identity().cloned()
    }

    fn handle_notification(&self, remote: Option<Payload>) {
        let Some(remote) = remote else {
            tracing::debug!("remote document absent");
            return;
        };
        let mut core = self.lock();
        if core.closed {
            return;
        }
        let decision = core.apply_remote(&remote, self.config.echo_grace);
        match decision {
            PullDecision::Diverged => {
                tracing::warn!("remote data diverged from local data; waiting for a decision")
            }
            PullDecision::Restored => {
                tracing::info!(trades = core.journal.trades().len(), "restored journal from cloud")
            }
            other => tracing::debug!(decision = ?other, "remote notification"),
        }
    }
}

// ---------------------------------------------------------------------------
// Push worker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum PushOutcome {
    Synced(DateTime<Utc>),
    Offline,
    Failed(String),
    TimedOut(Duration),
    Cancelled,
}

impl PushOutcome {
    fn into_result(self) -> Result<DateTime<Utc>> {
        match self {
            Self::Synced(at) => Ok(at),
            Self::Offline => Err(JournalError::Offline),
            Self::Failed(msg) => Err(JournalError::Remote(msg)),
            Self::TimedOut(after) => Err(JournalError::Timeout(after)),
            Self::Cancelled => Err(JournalError::SessionClosed),
        }
    }
}

enum Job {
    Push {
        epoch: u64,
        ack: Option<Sender<PushOutcome>>,
    },
    Wipe {
        user_id: String,
        snapshot: Snapshot,
        ack: Sender<PushOutcome>,
    },
    Adopt {
        user_id: String,
        ack: Sender<Result<()>>,
    },
    Shutdown,
}

struct PushWorker {
    shared: Arc<Shared>,
    /// A write that outlived its timeout and has not reported back yet.
    in_flight: Option<Receiver<Result<()>>>,
}

impl PushWorker {
    fn run(mut self, rx: Receiver<Job>) {
        while let Ok(first) = rx.recv() {
            let mut jobs = vec![first];
            jobs.extend(rx.try_iter());
            let count = jobs.len();

            let epoch = self.shared.lock().sync.epoch;
            let mut push_acks = Vec::new();
            let mut push_wanted = false;
            let mut shutdown = false;

            for job in jobs {
                match job {
                    Job::Push { epoch: queued_at, ack } => {
                        if queued_at == epoch {
                            push_wanted = true;
                            push_acks.extend(ack);
                        } else if let Some(ack) = ack {
                            let _ = ack.send(PushOutcome::Cancelled);
                        }
                    }
                    Job::Wipe { user_id, snapshot, ack } => {
                        let outcome = match self.write(&user_id, &snapshot) {
                            Ok(()) => PushOutcome::Synced(snapshot.last_updated),
                            Err(outcome) => outcome,
                        };
                        let _ = ack.send(outcome);
                    }
                    Job::Adopt { user_id, ack } => {
                        let _ = ack.send(self.adopt(&user_id));
                    }
                    Job::Shutdown => shutdown = true,
                }
            }

            if push_wanted {
                let outcome = self.push();
                for ack in push_acks {
                    let _ = ack.send(outcome.clone());
                }
            }
            self.shared.pending.done(count);
            if shutdown {
                break;
            }
        }
    }

    fn push(&mut self) -> PushOutcome {
        let Some(identity) = self.shared.online_identity() else {
            self.shared.lock().sync.status = SyncStatus::Offline;
            return PushOutcome::Offline;
        };

        let (snapshot, epoch) = {
            let mut core = self.shared.lock();
            if core.closed {
                return PushOutcome::Cancelled;
            }
            core.sync.status = SyncStatus::Saving;
            let write_id = core.sync.next_write_id(self.shared.config.write_id_memory);
            (core.journal.snapshot(Utc::now(), Some(write_id)), core.sync.epoch)
        };
        tracing::debug!(trades = snapshot.trades.len(), "pushing snapshot");

        let result = self.write(&identity.id, &snapshot);

        let mut core = self.shared.lock();
        let current = core.sync.epoch == epoch && core.sync.status == SyncStatus::Saving;
        match result {
            Ok(()) => {
                if current {
                    core.sync.status = SyncStatus::Synced;
                    core.sync.last_backup = Some(snapshot.last_updated);
                }
                PushOutcome::Synced(snapshot.last_updated)
            }
            Err(outcome) => {
                tracing::error!(?outcome, "cloud backup failed");
                if current {
                    core.sync.status = SyncStatus::Error;
                }
                outcome
            }
        }
    }

    /// One remote write, bounded by the push timeout and ordered after any
    /// earlier write that is still running.
    fn write(&mut self, user_id: &str, snapshot: &Snapshot) -> std::result::Result<(), PushOutcome> {
        let timeout = self.shared.config.push_timeout;
        self.settle_in_flight(timeout)?;

        let (tx, rx) = crossbeam::channel::bounded(1);
        let remote = Arc::clone(&self.shared.remote);
        let user_id = user_id.to_string();
        let snapshot = snapshot.clone();
        thread::Builder::new()
            .name("tradelog-remote-write".to_string())
            .spawn(move || {
                let _ = tx.send(remote.write(&user_id, &snapshot));
            })
            .map_err(|e| PushOutcome::Failed(e.to_string()))?;

        match rx.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PushOutcome::Failed(e.to_string())),
            Err(RecvTimeoutError::Timeout) => {
                self.in_flight = Some(rx);
                Err(PushOutcome::TimedOut(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(PushOutcome::Failed("remote writer exited without a result".to_string()))
            }
        }
    }

    fn settle_in_flight(&mut self, timeout: Duration) -> std::result::Result<(), PushOutcome> {
        let Some(rx) = self.in_flight.take() else {
            return Ok(());
        };
        match rx.recv_timeout(timeout) {
            Ok(result) => {
                tracing::debug!(ok = result.is_ok(), "late remote write settled");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                self.in_flight = Some(rx);
                Err(PushOutcome::TimedOut(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Ok(()),
        }
    }

    /// Point read of the remote document, adopted wholesale.
    fn adopt(&mut self, user_id: &str) -> Result<()> {
        let timeout = self.shared.config.push_timeout;
        if self.settle_in_flight(timeout).is_err() {
            return Err(JournalError::Timeout(timeout));
        }
        let fetched = self.shared.remote.read(user_id);
        let mut core = self.shared.lock();
        match fetched {
            Ok(Some(remote)) => {
                merge::adopt_remote(&mut core.journal, &remote);
                core.sync.status = SyncStatus::Synced;
                if remote.last_updated.is_some() {
                    core.sync.last_backup = remote.last_updated;
                }
                core.sync.conflict_open = false;
                tracing::info!(trades = core.journal.trades().len(), "kept remote data");
                Ok(())
            }
            Ok(None) => {
                tracing::warn!("remote document vanished; keeping local data");
                core.sync.conflict_open = false;
                Ok(())
            }
            Err(e) => {
                core.sync.status = SyncStatus::Error;
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pull loop
// ---------------------------------------------------------------------------

struct PullLoop {
    user_id: String,
    subscription: Subscription,
    handle: JoinHandle<()>,
}

impl PullLoop {
    fn start(shared: &Arc<Shared>, user_id: &str) -> Result<Self> {
        let (tx, rx) = crossbeam::channel::unbounded::<Option<Payload>>();
        let thread_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("tradelog-pull".to_string())
            .spawn(move || {
                for notification in rx.iter() {
                    thread_shared.handle_notification(notification);
                    thread_shared.pending.done(1);
                }
            })?;

        let pending = Arc::clone(&shared.pending);
        let callback: Callback = Box::new(move |notification| {
            pending.add(1);
            if tx.send(notification).is_err() {
                pending.done(1);
            }
        });
        let subscription = shared.remote.subscribe(user_id, callback);
        tracing::debug!(user_id, "subscribed to remote document");
        Ok(Self {
            user_id: user_id.to_string(),
            subscription,
            handle,
        })
    }

    fn stop(self) {
        self.subscription.unsubscribe();
        let _ = self.handle.join();
        tracing::debug!(user_id = %self.user_id, "unsubscribed from remote document");
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One user's journal plus its replication machinery.
pub struct Session {
    shared: Arc<Shared>,
    jobs: Sender<Job>,
    worker: Option<JoinHandle<()>>,
    pull: Mutex<Option<PullLoop>>,
}

impl Session {
    pub fn new(
        journal: Journal,
        remote: Arc<dyn RemoteDocs>,
        auth: Arc<dyn AuthProvider>,
        config: SyncConfig,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            gate: Mutex::new(Core {
                journal,
                sync: SyncState::new(),
                pending_import: None,
                closed: false,
            }),
            remote,
            auth,
            config,
            pending: Arc::new(Pending::default()),
        });

        let (jobs, rx) = crossbeam::channel::unbounded();
        let worker = PushWorker {
            shared: Arc::clone(&shared),
            in_flight: None,
        };
        let worker = thread::Builder::new()
            .name("tradelog-push".to_string())
            .spawn(move || worker.run(rx))?;

        let session = Self {
            shared,
            jobs,
            worker: Some(worker),
            pull: Mutex::new(None),
        };
        session.refresh_auth()?;
        Ok(session)
    }

    // -- observation --------------------------------------------------------

    pub fn status(&self) -> SyncStatus {
        self.shared.lock().sync.status
    }

    pub fn last_backup_time(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().sync.last_backup
    }

    pub fn has_pending_import(&self) -> bool {
        self.shared.lock().pending_import.is_some()
    }

    pub fn sync_conflict_open(&self) -> bool {
        self.shared.lock().sync.conflict_open
    }

    /// True once a factory reset has run; the session must be rebuilt.
    pub fn restart_required(&self) -> bool {
        self.shared.lock().closed
    }

    /// Read the journal under the gate.
    pub fn read<R>(&self, f: impl FnOnce(&Journal) -> R) -> R {
        f(&self.shared.lock().journal)
    }

    /// Block until queued pushes and delivered notifications are processed.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.pending.wait_zero(timeout)
    }

    // -- auth ---------------------------------------------------------------

    /// React to the auth provider's current state: subscribe while a user is
    /// online, otherwise drop the subscription and report `offline`.
    pub fn refresh_auth(&self) -> Result<()> {
        let mut pull = self.pull.lock().unwrap_or_else(|p| p.into_inner());
        let identity = self.shared.online_identity();

        if let (Some(identity), Some(current)) = (&identity, pull.as_ref()) {
            if current.user_id == identity.id {
                return Ok(());
            }
        }
        if let Some(old) = pull.take() {
            old.stop();
        }

        {
            let mut core = self.shared.lock();
            core.sync.forget_session();
            if identity.is_none() {
                core.sync.status = SyncStatus::Offline;
            }
            if core.closed {
                return Ok(());
            }
        }

        if let Some(identity) = identity {
            *pull = Some(PullLoop::start(&self.shared, &identity.id)?);
        }
        Ok(())
    }

    /// Complete sign-in with the provider and start syncing.
    pub fn login(&self) -> Result<()> {
        self.shared.auth.login()?;
        self.refresh_auth()
    }

    /// Sign out, stop syncing and wipe local data. Remote data is untouched.
    pub fn logout(&self) -> Result<()> {
        self.shared.auth.logout()?;
        self.refresh_auth()?;
        self.clear_local_data()
    }

    // -- actions ------------------------------------------------------------

    /// Replace the trade `existing_id`, or record a new one with a fresh id
    /// at the top of the list. Returns the trade's id.
    pub fn save_trade(&self, trade: Trade, existing_id: Option<&str>) -> Result<String> {
        ensure_finite("amount", trade.amount)?;
        self.mutate(|core| {
            let journal = &mut core.journal;
            match existing_id {
                Some(id) => {
                    let original = journal
                        .trade(id)
                        .ok_or_else(|| JournalError::UnknownTrade(id.to_string()))?;
                    let mut updated = trade;
                    updated.id = id.to_string();
                    if updated.timestamp.is_none() {
                        updated.timestamp = original.timestamp;
                    }
                    journal.update_trades(|prev| {
                        prev.into_iter()
                            .map(|t| if t.id == updated.id { updated.clone() } else { t })
                            .collect()
                    });
                    Ok((id.to_string(), true))
                }
                None => {
                    let mut created = trade;
                    created.id = journal.next_trade_id();
                    created.timestamp = Some(Utc::now());
                    let id = created.id.clone();
                    journal.update_trades(|mut prev| {
                        prev.insert(0, created);
                        prev
                    });
                    Ok((id, true))
                }
            }
        })
    }

    /// Remove a trade if present. Returns whether anything was removed.
    pub fn delete_trade(&self, id: &str) -> Result<bool> {
        self.mutate(|core| {
            let before = core.journal.trades().len();
            core.journal.update_trades(|prev| prev.into_iter().filter(|t| t.id != id).collect());
            Ok((core.journal.trades().len() != before, true))
        })
    }

    pub fn update_account(&self, id: &str, field: AccountField) -> Result<()> {
        if let AccountField::InitialCapital(capital) = &field {
            ensure_finite("initial capital", *capital)?;
        }
        self.mutate(|core| {
            if core.journal.account(id).is_none() {
                return Err(JournalError::UnknownAccount(id.to_string()));
            }
            core.journal.update_accounts(|prev| {
                prev.into_iter()
                    .map(|mut a| {
                        if a.id == id {
                            field.apply(&mut a);
                        }
                        a
                    })
                    .collect()
            });
            Ok(((), true))
        })
    }

    /// Replace the account list wholesale and reconcile the active selection.
    pub fn replace_accounts(&self, accounts: Vec<Account>) -> Result<()> {
        if accounts.is_empty() {
            return Err(JournalError::NoAccounts);
        }
        for account in &accounts {
            ensure_finite("initial capital", account.initial_capital)?;
        }
        self.mutate(|core| {
            let mut unique: Vec<Account> = Vec::with_capacity(accounts.len());
            for account in accounts {
                if !unique.iter().any(|a| a.id == account.id) {
                    unique.push(account);
                }
            }
            let old_ids = core.journal.account_ids();
            let previous_active = core.journal.active_accounts().to_vec();
            let new_ids: Vec<String> = unique.iter().map(|a| a.id.clone()).collect();
            core.journal.set_accounts(unique);
            let active = merge::reconcile_active_accounts(&old_ids, &previous_active, &new_ids);
            core.journal.select_accounts(active);
            Ok(((), true))
        })
    }

    /// Device-local view filter; not replicated.
    pub fn set_active_accounts(&self, ids: Vec<String>) -> Result<()> {
        self.mutate(|core| {
            core.journal.select_accounts(ids);
            Ok(((), false))
        })
    }

    /// Append a tag. A tag already present is a no-op and schedules nothing.
    pub fn add_taxonomy_entry(&self, which: Taxonomy, value: &str) -> Result<bool> {
        let value = value.trim().to_string();
        self.mutate(|core| {
            if value.is_empty() || core.journal.taxonomy(which).contains(&value) {
                return Ok((false, false));
            }
            core.journal.update_taxonomy(which, |mut prev| {
                prev.push(value);
                prev
            });
            Ok((true, true))
        })
    }

    pub fn remove_taxonomy_entry(&self, which: Taxonomy, value: &str) -> Result<bool> {
        self.mutate(|core| {
            let before = core.journal.taxonomy(which).len();
            core.journal
                .update_taxonomy(which, |prev| prev.into_iter().filter(|v| v != value).collect());
            Ok((core.journal.taxonomy(which).len() != before, true))
        })
    }

    pub fn set_loss_color(&self, color: &str) -> Result<()> {
        self.mutate(|core| {
            core.journal.set_loss_color(color);
            Ok(((), true))
        })
    }

    /// Push the current journal now and wait for the outcome. Refuses to
    /// touch the remote store without a signed-in, online user.
    pub fn trigger_cloud_backup(&self) -> Result<DateTime<Utc>> {
        self.ensure_open()?;
        if self.shared.online_identity().is_none() {
            self.shared.lock().sync.status = SyncStatus::Offline;
            return Err(JournalError::Offline);
        }
        let epoch = self.shared.lock().sync.epoch;
        let (ack, outcome) = crossbeam::channel::bounded(1);
        self.send(Job::Push {
            epoch,
            ack: Some(ack),
        })?;
        outcome
            .recv()
            .map_err(|_| JournalError::SessionClosed)?
            .into_result()
    }

    pub fn retry_sync(&self) -> Result<DateTime<Utc>> {
        self.trigger_cloud_backup()
    }

    /// Apply an import directly when there are no local trades, otherwise hold
    /// it for `resolve_import_conflict`.
    pub fn import_from_payload(&self, payload: Payload) -> Result<ImportOutcome> {
        self.mutate(|core| {
            if !core.journal.trades().is_empty() {
                core.pending_import = Some(payload);
                return Ok((ImportOutcome::Pending, false));
            }
            merge::apply_overwrite(&mut core.journal, &payload);
            Ok((ImportOutcome::Applied, true))
        })
    }

    pub fn import_from_json(&self, text: &str) -> Result<ImportOutcome> {
        let payload = Payload::parse(text)?;
        self.import_from_payload(payload)
    }

    pub fn resolve_import_conflict(&self, choice: ImportChoice) -> Result<()> {
        self.mutate(|core| {
            let payload = core.pending_import.take().ok_or(JournalError::NoPendingImport)?;
            match choice {
                ImportChoice::Overwrite => merge::apply_overwrite(&mut core.journal, &payload),
                ImportChoice::Merge => merge::apply_merge(&mut core.journal, &payload),
            }
            Ok(((), true))
        })
    }

    /// Settle an open sync conflict: keep local (force a push) or keep remote
    /// (fetch once more and adopt it).
    pub fn resolve_sync_conflict(&self, choice: SyncChoice) -> Result<()> {
        self.ensure_open()?;
        if !self.sync_conflict_open() {
            return Err(JournalError::NoSyncConflict);
        }
        match choice {
            SyncChoice::KeepLocal => {
                self.shared.lock().sync.conflict_open = false;
                self.trigger_cloud_backup().map(|_| ())
            }
            SyncChoice::KeepRemote => {
                let identity = self.shared.online_identity().ok_or(JournalError::Offline)?;
                let (ack, outcome) = crossbeam::channel::bounded(1);
                self.send(Job::Adopt {
                    user_id: identity.id,
                    ack,
                })?;
                outcome.recv().map_err(|_| JournalError::SessionClosed)?
            }
        }
    }

    /// The export document (snapshot minus sync fields).
    pub fn download_backup_snapshot(&self) -> BackupDocument {
        self.shared.lock().journal.export_document()
    }

    // -- lifecycle ----------------------------------------------------------

    /// Factory reset. Remote is wiped first when signed in, so a stray pull
    /// cannot bring the old data back; then local keys are removed. The
    /// session is closed afterwards and must be rebuilt.
    pub fn reset_all_data(&self) -> Result<ResetOutcome> {
        self.ensure_open()?;
        if let Some(old) = self.pull.lock().unwrap_or_else(|p| p.into_inner()).take() {
            old.stop();
        }
        self.shared.lock().sync.epoch += 1;

        let wiped = match self.shared.online_identity() {
            Some(identity) => {
                let mut snapshot = factory_snapshot(Utc::now());
                snapshot.write_id = Some(
                    self.shared
                        .lock()
                        .sync
                        .next_write_id(self.shared.config.write_id_memory),
                );
                let (ack, outcome) = crossbeam::channel::bounded(1);
                self.send(Job::Wipe {
                    user_id: identity.id,
                    snapshot,
                    ack,
                })?;
                Some(outcome.recv().map_err(|_| JournalError::SessionClosed)?)
            }
            None => None,
        };

        let mut core = self.shared.lock();
        let outcome = match wiped {
            Some(PushOutcome::Synced(_)) => {
                core.journal.reset_to_defaults();
                core.journal.purge_persisted();
                ResetOutcome::Complete { remote_wiped: true }
            }
            None => {
                core.journal.reset_to_defaults();
                core.journal.purge_persisted();
                ResetOutcome::Complete { remote_wiped: false }
            }
            Some(failed) => {
                let reason = failed
                    .into_result()
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                tracing::warn!(%reason, "cloud reset failed; resetting local data only");
                core.journal.reset_to_defaults();
                core.journal.clear_store();
                ResetOutcome::LocalOnly { reason }
            }
        };
        core.pending_import = None;
        core.sync.forget_session();
        core.sync.status = SyncStatus::Offline;
        core.closed = true;
        Ok(outcome)
    }

    /// Reset local data to factory defaults without touching remote. Pushes
    /// still queued from before are dropped.
    pub fn clear_local_data(&self) -> Result<()> {
        self.ensure_open()?;
        let mut core = self.shared.lock();
        core.sync.epoch += 1;
        core.journal.reset_to_defaults();
        core.journal.purge_persisted();
        core.pending_import = None;
        core.sync.forget_session();
        Ok(())
    }

    // -- internals ----------------------------------------------------------

    fn ensure_open(&self) -> Result<()> {
        if self.shared.lock().closed {
            return Err(JournalError::SessionClosed);
        }
        Ok(())
    }

    /// Run `f` under the gate; when it asks for a push, enqueue one after the
    /// gate is released.
    fn mutate<R>(&self, f: impl FnOnce(&mut Core) -> Result<(R, bool)>) -> Result<R> {
        let (value, epoch) = {
            let mut core = self.shared.lock();
            if core.closed {
                return Err(JournalError::SessionClosed);
            }
            let (value, push) = f(&mut core)?;
            (value, push.then_some(core.sync.epoch))
        };
        if let Some(epoch) = epoch {
            self.send(Job::Push { epoch, ack: None })?;
        }
        Ok(value)
    }

    fn send(&self, job: Job) -> Result<()> {
        self.shared.pending.add(1);
        self.jobs.send(job).map_err(|_| {
            self.shared.pending.done(1);
            JournalError::SessionClosed
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(pull) = self.pull.lock().unwrap_or_else(|p| p.into_inner()).take() {
            pull.stop();
        }
        let _ = self.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LocalAuth;
    use crate::models::MAIN_ACCOUNT_ID;
    use crate::remote::MemoryRemote;
    use crate::store::{LocalStore, MemoryStore, SqliteStore};
    use chrono::NaiveDate;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(5);

    fn trade(date: &str, amount: f64) -> Trade {
        Trade::new(NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(), amount, MAIN_ACCOUNT_ID)
    }

    fn config() -> SyncConfig {
        SyncConfig {
            push_timeout: Duration::from_secs(2),
            ..SyncConfig::default()
        }
    }

    fn online(user: &str) -> Arc<LocalAuth> {
        Arc::new(LocalAuth::new(Some(Identity::new(user))))
    }

    fn session(remote: &Arc<MemoryRemote>, auth: &Arc<LocalAuth>) -> Session {
        let journal = Journal::load(Box::new(MemoryStore::new()));
        Session::new(journal, remote.clone(), auth.clone(), config()).unwrap()
    }

    fn remote_trade_count(remote: &MemoryRemote, user: &str) -> usize {
        remote
            .read(user)
            .unwrap()
            .and_then(|p| p.trades)
            .map_or(0, |t| t.len())
    }

    #[test]
    fn test_no_push_without_authentication() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = Arc::new(LocalAuth::new(None));
        let s = session(&remote, &auth);
        s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        assert!(matches!(s.trigger_cloud_backup(), Err(JournalError::Offline)));
        assert!(s.wait_idle(WAIT));
        assert_eq!(s.status(), SyncStatus::Offline);
        assert_eq!(remote.write_count(), 0);
    }

    #[test]
    fn test_mutation_schedules_push() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let s = session(&remote, &auth);
        s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        assert!(s.wait_idle(WAIT));
        assert_eq!(remote_trade_count(&remote, "u1"), 1);
        assert_eq!(s.status(), SyncStatus::Synced);
        assert!(s.last_backup_time().is_some());
        assert!(!s.sync_conflict_open());
    }

    #[test]
    fn test_rapid_mutations_coalesce_and_land_in_order() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_latency(Duration::from_millis(100));
        let auth = online("u1");
        let s = session(&remote, &auth);
        let id = s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        for i in 0..4 {
            s.save_trade(trade("2024-01-02", i as f64), None).unwrap();
        }
        s.delete_trade(&id).unwrap();
        assert!(s.wait_idle(WAIT));
        assert!(remote.write_count() < 6);
        assert_eq!(remote_trade_count(&remote, "u1"), 4);
        assert_eq!(s.status(), SyncStatus::Synced);
    }

    #[test]
    fn test_failed_push_then_retry() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let s = session(&remote, &auth);
        remote.fail_next_writes(1);
        s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        assert!(s.wait_idle(WAIT));
        assert_eq!(s.status(), SyncStatus::Error);
        assert_eq!(s.read(|j| j.trades().len()), 1);

        s.retry_sync().unwrap();
        assert_eq!(s.status(), SyncStatus::Synced);
        assert_eq!(remote_trade_count(&remote, "u1"), 1);
    }

    #[test]
    fn test_timed_out_push_does_not_wedge_saving() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_latency(Duration::from_millis(400));
        let auth = online("u1");
        let journal = Journal::load(Box::new(MemoryStore::new()));
        let cfg = SyncConfig {
            push_timeout: Duration::from_millis(100),
            ..SyncConfig::default()
        };
        let s = Session::new(journal, remote.clone(), auth.clone(), cfg).unwrap();

        assert!(matches!(s.trigger_cloud_backup(), Err(JournalError::Timeout(_))));
        assert_eq!(s.status(), SyncStatus::Error);

        remote.set_latency(Duration::ZERO);
        // The late write has to settle before the retry can go out.
        let mut result = s.retry_sync();
        for _ in 0..10 {
            if result.is_ok() {
                break;
            }
            result = s.retry_sync();
        }
        result.unwrap();
        assert_eq!(s.status(), SyncStatus::Synced);
        assert_eq!(remote.write_count(), 2);
    }

    #[test]
    fn test_auto_restore_on_empty_local() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        {
            let first = session(&remote, &auth);
            for d in ["2024-01-01", "2024-01-02", "2024-01-03"] {
                first.save_trade(trade(d, 1.0), None).unwrap();
            }
            first.add_taxonomy_entry(Taxonomy::Labels, "swing").unwrap();
            assert!(first.wait_idle(WAIT));
        }

        let second = session(&remote, &auth);
        assert!(second.wait_idle(WAIT));
        assert_eq!(second.read(|j| j.trades().len()), 3);
        assert!(second.read(|j| j.taxonomy(Taxonomy::Labels).contains(&"swing".to_string())));
        assert_eq!(second.status(), SyncStatus::Synced);
        assert!(!second.sync_conflict_open());
    }

    #[test]
    fn test_login_starts_sync_and_restores() {
        let remote = Arc::new(MemoryRemote::new());
        remote.put_raw(
            "u1",
            json!({"trades": [{"id": "r", "date": "2024-01-01", "amount": 5.0, "portfolioId": "main"}]}),
        );
        let auth = Arc::new(LocalAuth::pending(Some(Identity::new("u1"))));
        let s = session(&remote, &auth);
        assert!(s.wait_idle(WAIT));
        assert_eq!(s.status(), SyncStatus::Offline);
        assert!(s.read(|j| j.trades().is_empty()));

        s.login().unwrap();
        assert!(s.wait_idle(WAIT));
        assert_eq!(s.read(|j| j.trades()[0].id.clone()), "r");
        assert_eq!(s.status(), SyncStatus::Synced);
    }

    #[test]
    fn test_first_divergence_opens_conflict() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        remote.put_raw(
            "u1",
            json!({"trades": [{"id": "r", "date": "2024-01-01", "amount": 5.0, "portfolioId": "main"}]}),
        );

        let mut store = MemoryStore::new();
        crate::store::set_json(
            &mut store,
            crate::store::KEY_TRADES,
            &json!([{"id": "l", "date": "2024-02-01", "amount": 1.0, "portfolioId": "main"}]),
        );
        let s = Session::new(Journal::load(Box::new(store)), remote.clone(), auth.clone(), config()).unwrap();
        assert!(s.wait_idle(WAIT));
        assert!(s.sync_conflict_open());
        assert_eq!(s.read(|j| j.trades()[0].id.clone()), "l");
    }

    #[test]
    fn test_grace_window_separates_echo_from_remote_change() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let s = session(&remote, &auth);
        s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        assert!(s.wait_idle(WAIT));
        let pushed_at = s.last_backup_time().unwrap();

        let other = |at: DateTime<Utc>| {
            json!({
                "trades": [{"id": "x", "date": "2024-03-01", "amount": 7.0, "portfolioId": "main"}],
                "lastUpdated": at.to_rfc3339(),
            })
        };

        remote.put_raw("u1", other(pushed_at + chrono::Duration::seconds(3)));
        assert!(s.wait_idle(WAIT));
        assert!(!s.sync_conflict_open());
        assert_eq!(s.status(), SyncStatus::Synced);

        let adopted = s.last_backup_time().unwrap();
        remote.put_raw("u1", other(adopted + chrono::Duration::seconds(10)));
        assert!(s.wait_idle(WAIT));
        assert!(s.sync_conflict_open());
    }

    #[test]
    fn test_grace_window_boundary_is_inclusive() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let s = session(&remote, &auth);
        s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        assert!(s.wait_idle(WAIT));
        let pushed_at = s.last_backup_time().unwrap();

        let other = |at: DateTime<Utc>| {
            json!({
                "trades": [{"id": "x", "date": "2024-03-01", "amount": 7.0, "portfolioId": "main"}],
                "lastUpdated": at.to_rfc3339(),
            })
        };

        // Exactly the grace window still counts as our own trailing write.
        let edge = pushed_at + chrono::Duration::seconds(5);
        remote.put_raw("u1", other(edge));
        assert!(s.wait_idle(WAIT));
        assert!(!s.sync_conflict_open());
        assert_eq!(s.last_backup_time(), Some(edge));

        remote.put_raw("u1", other(edge + chrono::Duration::milliseconds(5_001)));
        assert!(s.wait_idle(WAIT));
        assert!(s.sync_conflict_open());
    }

    #[test]
    fn test_own_echo_is_never_divergence() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let s = session(&remote, &auth);
        s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        assert!(s.wait_idle(WAIT));
        let echo = remote.document("u1").unwrap();
        s.save_trade(trade("2024-01-02", 20.0), None).unwrap();
        assert!(s.wait_idle(WAIT));

        // A late redelivery of our first write, well past the grace window.
        let mut late = echo;
        late["lastUpdated"] = json!((Utc::now() + chrono::Duration::seconds(60)).to_rfc3339());
        remote.put_raw("u1", late);
        assert!(s.wait_idle(WAIT));
        assert!(!s.sync_conflict_open());
    }

    #[test]
    fn test_keep_remote_adopts_remote_document() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let s = session(&remote, &auth);
        s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        assert!(s.wait_idle(WAIT));
        remote.put_raw(
            "u1",
            json!({
                "trades": [{"id": "x", "date": "2024-03-01", "amount": 7.0, "portfolioId": "acct"}],
                "portfolios": [{"id": "acct", "name": "Other device"}],
                "lastUpdated": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
            }),
        );
        assert!(s.wait_idle(WAIT));
        assert!(s.sync_conflict_open());

        s.resolve_sync_conflict(SyncChoice::KeepRemote).unwrap();
        assert!(!s.sync_conflict_open());
        assert_eq!(s.status(), SyncStatus::Synced);
        assert_eq!(s.read(|j| j.trades()[0].id.clone()), "x");
        assert_eq!(s.read(|j| j.active_accounts().to_vec()), vec!["acct".to_string()]);
    }

    #[test]
    fn test_keep_local_overwrites_remote() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let s = session(&remote, &auth);
        s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        assert!(s.wait_idle(WAIT));
        remote.put_raw(
            "u1",
            json!({
                "trades": [{"id": "x", "date": "2024-03-01", "amount": 7.0}],
                "lastUpdated": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
            }),
        );
        assert!(s.wait_idle(WAIT));
        s.resolve_sync_conflict(SyncChoice::KeepLocal).unwrap();
        assert!(!s.sync_conflict_open());
        let pushed = remote.read("u1").unwrap().unwrap().trades.unwrap();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].amount, 10.0);
        assert!(matches!(
            s.resolve_sync_conflict(SyncChoice::KeepLocal),
            Err(JournalError::NoSyncConflict)
        ));
    }

    #[test]
    fn test_malformed_remote_documents_are_ignored() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let s = session(&remote, &auth);
        remote.put_raw("u1", json!("garbage"));
        remote.put_raw("u1", json!({"trades": 42, "strategies": {"a": 1}}));
        assert!(s.wait_idle(WAIT));
        assert!(s.read(|j| j.trades().is_empty()));
        assert_eq!(s.read(|j| j.taxonomy(Taxonomy::Strategies).len()), 3);
        assert!(!s.sync_conflict_open());
    }

    #[test]
    fn test_import_direct_when_local_empty() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let s = session(&remote, &auth);
        let outcome = s
            .import_from_json(r#"{"trades":[{"id":"a","date":"2024-01-01","amount":100}],"strategies":["x"]}"#)
            .unwrap();
        assert_eq!(outcome, ImportOutcome::Applied);
        assert!(!s.has_pending_import());
        assert!(s.wait_idle(WAIT));
        assert_eq!(remote_trade_count(&remote, "u1"), 1);
        assert_eq!(s.read(|j| j.taxonomy(Taxonomy::Strategies).to_vec()), vec!["x".to_string()]);
    }

    #[test]
    fn test_import_conflict_merge_scenario() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = Arc::new(LocalAuth::new(None));
        let s = session(&remote, &auth);
        s.import_from_json(r#"{"trades":[{"id":"a","date":"2024-01-01","amount":100}]}"#)
            .unwrap();

        let outcome = s
            .import_from_json(
                r#"{"trades":[{"id":"a","date":"2024-01-02","amount":200},{"id":"b","date":"2024-01-03","amount":-50}]}"#,
            )
            .unwrap();
        assert_eq!(outcome, ImportOutcome::Pending);
        assert!(s.has_pending_import());
        assert_eq!(s.read(|j| j.trades()[0].amount), 100.0);

        s.resolve_import_conflict(ImportChoice::Merge).unwrap();
        assert!(!s.has_pending_import());
        let trades = s.read(|j| j.trades().to_vec());
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].id, "b");
        assert_eq!(trades[1].id, "a");
        assert_eq!(trades[1].amount, 200.0);
        assert!(matches!(
            s.resolve_import_conflict(ImportChoice::Merge),
            Err(JournalError::NoPendingImport)
        ));
    }

    #[test]
    fn test_malformed_import_changes_nothing() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let s = session(&remote, &auth);
        assert!(matches!(s.import_from_json("{oops"), Err(JournalError::MalformedImport(_))));
        assert!(s.wait_idle(WAIT));
        assert_eq!(remote.write_count(), 0);
        assert!(!s.has_pending_import());
    }

    #[test]
    fn test_import_keeps_readable_trades_from_mixed_file() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = Arc::new(LocalAuth::new(None));
        let s = session(&remote, &auth);
        let outcome = s
            .import_from_json(
                r#"{"trades":[{"id":"a","date":"2024-01-01","amount":1},{"id":"b","date":"2024-01-02","amount":2,"timestamp":"yesterday"},{"id":"c","date":"2024-01-03","amount":null}]}"#,
            )
            .unwrap();
        assert_eq!(outcome, ImportOutcome::Applied);
        let ids: Vec<String> = s.read(|j| j.trades().iter().map(|t| t.id.clone()).collect());
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        assert!(matches!(
            s.import_from_json(r#"{"trades":[{"id":"z","date":"someday","amount":1}]}"#),
            Err(JournalError::MalformedImport(_))
        ));
        assert_eq!(s.read(|j| j.trades().len()), 2);
    }

    #[test]
    fn test_non_finite_values_are_rejected_and_store_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let remote = Arc::new(MemoryRemote::new());
        let auth = Arc::new(LocalAuth::new(None));
        {
            let journal = Journal::load(Box::new(SqliteStore::open(&path).unwrap()));
            let s = Session::new(journal, remote.clone(), auth.clone(), config()).unwrap();
            for day in ["2024-01-01", "2024-01-02", "2024-01-03"] {
                s.save_trade(trade(day, 10.0), None).unwrap();
            }
            assert!(matches!(
                s.save_trade(trade("2024-01-04", f64::NAN), None),
                Err(JournalError::InvalidInput(_))
            ));
            let first = s.read(|j| j.trades()[0].id.clone());
            assert!(matches!(
                s.save_trade(trade("2024-01-04", f64::INFINITY), Some(&first)),
                Err(JournalError::InvalidInput(_))
            ));
            assert!(matches!(
                s.update_account(MAIN_ACCOUNT_ID, AccountField::InitialCapital(f64::NEG_INFINITY)),
                Err(JournalError::InvalidInput(_))
            ));
            let mut bad = Account::main();
            bad.id = "bad".to_string();
            bad.initial_capital = f64::NAN;
            assert!(matches!(
                s.replace_accounts(vec![Account::main(), bad]),
                Err(JournalError::InvalidInput(_))
            ));
            assert!(s.wait_idle(WAIT));
        }

        let reloaded = Journal::load(Box::new(SqliteStore::open(&path).unwrap()));
        assert_eq!(reloaded.trades().len(), 3);
        assert!(reloaded.trades().iter().all(|t| t.amount == 10.0));
        assert_eq!(reloaded.accounts().len(), 1);
        assert_eq!(reloaded.accounts()[0].initial_capital, 100_000.0);
        assert_eq!(remote.write_count(), 0);
    }

    #[test]
    fn test_trade_ids_stay_unique() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = Arc::new(LocalAuth::new(None));
        let s = session(&remote, &auth);
        let mut ids = Vec::new();
        for _ in 0..50 {
            ids.push(s.save_trade(trade("2024-01-01", 1.0), None).unwrap());
        }
        let edited = s.save_trade(trade("2024-01-05", 2.0), Some(&ids[10])).unwrap();
        assert_eq!(edited, ids[10]);
        let mut seen: Vec<String> = s.read(|j| j.trades().iter().map(|t| t.id.clone()).collect());
        assert_eq!(seen.len(), 50);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 50);
        assert!(matches!(
            s.save_trade(trade("2024-01-05", 2.0), Some("missing")),
            Err(JournalError::UnknownTrade(_))
        ));
    }

    #[test]
    fn test_taxonomy_add_is_idempotent() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let s = session(&remote, &auth);
        assert!(s.add_taxonomy_entry(Taxonomy::Strategies, "breakout").unwrap());
        assert!(s.wait_idle(WAIT));
        let writes = remote.write_count();
        let once = s.read(|j| j.taxonomy(Taxonomy::Strategies).to_vec());

        assert!(!s.add_taxonomy_entry(Taxonomy::Strategies, "breakout").unwrap());
        assert!(s.wait_idle(WAIT));
        assert_eq!(s.read(|j| j.taxonomy(Taxonomy::Strategies).to_vec()), once);
        assert_eq!(remote.write_count(), writes);

        assert!(!s.remove_taxonomy_entry(Taxonomy::Strategies, "absent").unwrap());
        assert!(s.wait_idle(WAIT));
        assert_eq!(remote.write_count(), writes + 1);
    }

    #[test]
    fn test_replace_accounts_reconciles_selection() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = Arc::new(LocalAuth::new(None));
        let s = session(&remote, &auth);
        let acct = |id: &str| Account {
            id: id.to_string(),
            ..Account::main()
        };

        s.replace_accounts(vec![acct("main"), acct("b")]).unwrap();
        assert_eq!(s.read(|j| j.active_accounts().to_vec()), vec!["main", "b"]);

        s.set_active_accounts(vec!["b".to_string()]).unwrap();
        s.replace_accounts(vec![acct("b"), acct("c")]).unwrap();
        assert_eq!(s.read(|j| j.active_accounts().to_vec()), vec!["b"]);

        s.replace_accounts(vec![acct("d")]).unwrap();
        assert_eq!(s.read(|j| j.active_accounts().to_vec()), vec!["d"]);

        assert!(matches!(s.replace_accounts(vec![]), Err(JournalError::NoAccounts)));
        s.update_account("d", AccountField::Name("Day".to_string())).unwrap();
        assert_eq!(s.read(|j| j.account("d").unwrap().name.clone()), "Day");
        assert!(s.update_account("zzz", AccountField::InitialCapital(1.0)).is_err());
    }

    #[test]
    fn test_refresh_auth_drops_subscription_when_offline() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let s = session(&remote, &auth);
        assert_eq!(remote.subscriber_count("u1"), 1);
        auth.go_offline();
        s.refresh_auth().unwrap();
        assert_eq!(remote.subscriber_count("u1"), 0);
        assert_eq!(s.status(), SyncStatus::Offline);
        assert!(s.last_backup_time().is_none());
    }

    // -- lifecycle ----------------------------------------------------------

    type Log = Arc<Mutex<Vec<String>>>;

    struct RecordingStore {
        inner: MemoryStore,
        log: Log,
    }

    impl LocalStore for RecordingStore {
        fn get_raw(&self, key: &str) -> Result<Option<String>> {
            self.inner.get_raw(key)
        }
        fn set_raw(&mut self, key: &str, value: &str) -> Result<()> {
            self.inner.set_raw(key, value)
        }
        fn remove(&mut self, key: &str) -> Result<()> {
            self.log.lock().unwrap().push(format!("remove:{key}"));
            self.inner.remove(key)
        }
        fn clear(&mut self) -> Result<()> {
            self.log.lock().unwrap().push("clear".to_string());
            self.inner.clear()
        }
    }

    struct RecordingRemote {
        inner: Arc<MemoryRemote>,
        log: Log,
    }

    impl RemoteDocs for RecordingRemote {
        fn write(&self, user_id: &str, snapshot: &Snapshot) -> Result<()> {
            self.log.lock().unwrap().push("remote:write".to_string());
            self.inner.write(user_id, snapshot)
        }
        fn read(&self, user_id: &str) -> Result<Option<Payload>> {
            self.inner.read(user_id)
        }
        fn subscribe(&self, user_id: &str, callback: Callback) -> Subscription {
            self.inner.subscribe(user_id, callback)
        }
    }

    fn recorded_session(remote: &Arc<MemoryRemote>, auth: &Arc<LocalAuth>) -> (Session, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let store = RecordingStore {
            inner: MemoryStore::new(),
            log: log.clone(),
        };
        let recording = Arc::new(RecordingRemote {
            inner: remote.clone(),
            log: log.clone(),
        });
        let s = Session::new(Journal::load(Box::new(store)), recording, auth.clone(), config()).unwrap();
        (s, log)
    }

    #[test]
    fn test_reset_wipes_remote_before_local() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let (s, log) = recorded_session(&remote, &auth);
        s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        assert!(s.wait_idle(WAIT));
        log.lock().unwrap().clear();

        let outcome = s.reset_all_data().unwrap();
        assert_eq!(outcome, ResetOutcome::Complete { remote_wiped: true });

        let log = log.lock().unwrap().clone();
        let wipe = log.iter().position(|e| e == "remote:write").unwrap();
        let first_removal = log.iter().position(|e| e.starts_with("remove:")).unwrap();
        assert!(wipe < first_removal, "{log:?}");
        assert_eq!(remote_trade_count(&remote, "u1"), 0);
        assert_eq!(remote.subscriber_count("u1"), 0);
        assert!(s.restart_required());
        assert!(matches!(
            s.save_trade(trade("2024-01-01", 1.0), None),
            Err(JournalError::SessionClosed)
        ));
    }

    #[test]
    fn test_reset_falls_back_to_local_when_remote_fails() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = online("u1");
        let (s, log) = recorded_session(&remote, &auth);
        s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        assert!(s.wait_idle(WAIT));
        remote.set_failing(true);

        let outcome = s.reset_all_data().unwrap();
        assert!(matches!(outcome, ResetOutcome::LocalOnly { .. }));
        assert!(log.lock().unwrap().contains(&"clear".to_string()));
        assert_eq!(remote_trade_count(&remote, "u1"), 1);
        assert!(s.read(|j| j.trades().is_empty()));
    }

    #[test]
    fn test_reset_offline_skips_remote() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = Arc::new(LocalAuth::new(None));
        let (s, log) = recorded_session(&remote, &auth);
        let outcome = s.reset_all_data().unwrap();
        assert_eq!(outcome, ResetOutcome::Complete { remote_wiped: false });
        assert!(!log.lock().unwrap().contains(&"remote:write".to_string()));
    }

    #[test]
    fn test_clear_local_data_never_touches_remote() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_latency(Duration::from_millis(50));
        let auth = online("u1");
        let s = session(&remote, &auth);
        s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        assert!(s.wait_idle(WAIT));
        let writes = remote.write_count();

        s.logout().unwrap();
        assert!(s.wait_idle(WAIT));
        assert_eq!(remote.write_count(), writes);
        assert_eq!(remote_trade_count(&remote, "u1"), 1);
        assert!(s.read(|j| j.trades().is_empty()));
        assert_eq!(s.status(), SyncStatus::Offline);
        assert!(!s.restart_required());
    }

    #[test]
    fn test_download_backup_snapshot_has_no_sync_fields() {
        let remote = Arc::new(MemoryRemote::new());
        let auth = Arc::new(LocalAuth::new(None));
        let s = session(&remote, &auth);
        s.save_trade(trade("2024-01-01", 10.0), None).unwrap();
        let value = serde_json::to_value(s.download_backup_snapshot()).unwrap();
        assert_eq!(value["trades"].as_array().unwrap().len(), 1);
        assert!(value.get("lastUpdated").is_none());
        assert!(value.get("writeId").is_none());
        assert!(value.get("portfolios").is_some());
    }
}
