//! Scripted native engine for tests.
//!
//! [`ScriptedEngine`] speaks both protocols. Behaviour is scripted per SQL
//! text, every native call is recorded, and `open` can be held back with
//! [`ScriptedEngine::gate_open`] so work can be submitted while the
//! connection is still opening. [`ScriptedEngine::resolve_immediately`]
//! makes every other call complete within its first poll.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::events::{ChannelToken, EventBus};
use crate::native::{ChannelEngine, CursorEngine, NativeEngine, NativeError, NativeResult};
use crate::value::{HandleId, Row, StatementId, Value};

/// Behaviour of one SQL text.
#[derive(Debug, Clone, Default)]
pub struct StatementScript {
    prepare_error: Option<String>,
    rows: Vec<Row>,
    step_error: Option<(usize, String)>,
    exec_error: Option<String>,
}

impl StatementScript {
    /// Succeeds with `rows`.
    #[must_use]
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Fails at prepare time (cursor) or immediately (channel).
    #[must_use]
    pub fn prepare_error(message: impl Into<String>) -> Self {
        Self {
            prepare_error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Fail once `delivered` rows have been produced.
    #[must_use]
    pub fn step_error_after(mut self, delivered: usize, message: impl Into<String>) -> Self {
        self.step_error = Some((delivered, message.into()));
        self
    }

    /// Channel protocol only: resolve exec with an error after emitting every row.
    #[must_use]
    pub fn exec_error(mut self, message: impl Into<String>) -> Self {
        self.exec_error = Some(message.into());
        self
    }
}

/// Native call as observed by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open { name: String },
    Close { handle: HandleId },
    Prepare { handle: HandleId, sql: String, params: Vec<Value> },
    Step { handle: HandleId, statement: StatementId },
    Exec { handle: HandleId, sql: String, params: Vec<Value>, token: ChannelToken },
}

/// Releases a gated `open`.
#[derive(Debug)]
pub struct OpenGate(oneshot::Sender<()>);

impl OpenGate {
    pub fn release(self) {
        // The receiver is gone only if the open future was dropped.
        let _ = self.0.send(());
    }
}

#[derive(Debug)]
struct Cursor {
    rows: VecDeque<Row>,
    step_error: Option<(usize, String)>,
    stepped: usize,
}

#[derive(Debug, Default)]
struct State {
    open_result: Option<Result<HandleId, String>>,
    close_error: Option<String>,
    open_gate: Option<oneshot::Receiver<()>>,
    scripts: HashMap<String, StatementScript>,
    cursors: HashMap<StatementId, Cursor>,
    calls: Vec<Call>,
    exec_subscribed: Vec<bool>,
    immediate: bool,
}

/// In-memory engine driven by [`StatementScript`]s.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    state: Mutex<State>,
    events: EventBus,
    next_statement: AtomicU64,
}

impl ScriptedEngine {
    /// Engine whose `open` succeeds with handle 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_handle(handle: HandleId) -> Self {
        let engine = Self::new();
        engine.state.lock().open_result = Some(Ok(handle));
        engine
    }

    #[must_use]
    pub fn failing_open(message: impl Into<String>) -> Self {
        let engine = Self::new();
        engine.state.lock().open_result = Some(Err(message.into()));
        engine
    }

    pub fn fail_close(&self, message: impl Into<String>) {
        self.state.lock().close_error = Some(message.into());
    }

    /// Resolve every native call without suspending, except a gated open.
    pub fn resolve_immediately(&self) {
        self.state.lock().immediate = true;
    }

    pub fn script(&self, sql: impl Into<String>, script: StatementScript) {
        self.state.lock().scripts.insert(sql.into(), script);
    }

    /// Hold `open` until the returned gate is released.
    #[must_use]
    pub fn gate_open(&self) -> OpenGate {
        let (tx, rx) = oneshot::channel();
        self.state.lock().open_gate = Some(rx);
        OpenGate(tx)
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// SQL of every prepare or exec call, in issue order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Prepare { sql, .. } | Call::Exec { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// For each exec call, whether its channel had a subscriber when issued.
    #[must_use]
    pub fn exec_subscription_states(&self) -> Vec<bool> {
        self.state.lock().exec_subscribed.clone()
    }

    async fn pause(&self) {
        let immediate = self.state.lock().immediate;
        if !immediate {
            tokio::task::yield_now().await;
        }
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    fn script_for(&self, sql: &str) -> StatementScript {
        self.state.lock().scripts.get(sql).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl NativeEngine for ScriptedEngine {
    async fn open_from_filename(&self, name: &str) -> NativeResult<HandleId> {
        self.record(Call::Open {
            name: name.to_owned(),
        });
        let gate = self.state.lock().open_gate.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        } else {
            self.pause().await;
        }

        let result = self.state.lock().open_result.clone();
        match result {
            Some(Ok(handle)) => Ok(handle),
            Some(Err(message)) => Err(NativeError::new(message)),
            None => Ok(HandleId::new(1)),
        }
    }

    async fn close_database(&self, handle: HandleId) -> NativeResult<()> {
        self.record(Call::Close { handle });
        self.pause().await;
        match self.state.lock().close_error.clone() {
            Some(message) => Err(NativeError::new(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CursorEngine for ScriptedEngine {
    async fn prepare_statement(
        &self,
        handle: HandleId,
        sql: &str,
        params: &[Value],
    ) -> NativeResult<StatementId> {
        self.record(Call::Prepare {
            handle,
            sql: sql.to_owned(),
            params: params.to_vec(),
        });
        self.pause().await;

        let script = self.script_for(sql);
        if let Some(message) = script.prepare_error {
            return Err(NativeError::new(message));
        }

        let id = StatementId::new(self.next_statement.fetch_add(1, Ordering::Relaxed) + 1);
        self.state.lock().cursors.insert(
            id,
            Cursor {
                rows: script.rows.into(),
                step_error: script.step_error,
                stepped: 0,
            },
        );
        Ok(id)
    }

    async fn step_statement(
        &self,
        handle: HandleId,
        statement: StatementId,
    ) -> NativeResult<Option<Row>> {
        self.record(Call::Step { handle, statement });
        self.pause().await;

        let mut state = self.state.lock();
        let Some(cursor) = state.cursors.get_mut(&statement) else {
            return Err(NativeError::new(format!("no such statement: {statement}")));
        };

        if let Some((after, message)) = &cursor.step_error
            && cursor.stepped == *after
        {
            let message = message.clone();
            state.cursors.remove(&statement);
            return Err(NativeError::new(message));
        }

        match cursor.rows.pop_front() {
            Some(row) => {
                cursor.stepped += 1;
                Ok(Some(row))
            }
            None => {
                state.cursors.remove(&statement);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ChannelEngine for ScriptedEngine {
    fn events(&self) -> &EventBus {
        &self.events
    }

    async fn exec_on_database(
        &self,
        handle: HandleId,
        sql: &str,
        params: &[Value],
        token: &ChannelToken,
    ) -> NativeResult<()> {
        {
            let mut state = self.state.lock();
            state.calls.push(Call::Exec {
                handle,
                sql: sql.to_owned(),
                params: params.to_vec(),
                token: token.clone(),
            });
            state.exec_subscribed.push(self.events.is_subscribed(token));
        }
        self.pause().await;

        let script = self.script_for(sql);
        if let Some(message) = script.prepare_error {
            return Err(NativeError::new(message));
        }

        for (index, row) in script.rows.into_iter().enumerate() {
            if let Some((after, message)) = &script.step_error
                && index == *after
            {
                return Err(NativeError::new(message.clone()));
            }
            self.events.emit(token, row);
            self.pause().await;
        }

        match script.exec_error {
            Some(message) => Err(NativeError::new(message)),
            None => Ok(()),
        }
    }
}
