//! In-memory reference engine
//!
//! `MemoryEngine` implements [`EngineBackend`] without any native code. It knows
//! a handful of pinyin syllables, pages candidates, tracks runtime options and
//! schemas, and emits the same notifications a native engine would. Tests pair
//! it with an [`EngineProbe`] to observe every engine entry and inject failures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::{EngineBackend, EngineError, EngineFactory, EngineResult, RawNotification, StartupParams};
use crate::domain::keys::{self, KeyModifiers};
use crate::domain::{CandidateItem, CandidateMenu, Commit, Composition, Context, EMPTY_SCHEMA_ID, SchemaItem, Status};

/// Default number of candidates per page
pub const DEFAULT_PAGE_SIZE: usize = 5;

const DICTIONARY: &[(&str, &[&str])] = &[
    ("ni", &["你", "尼", "泥", "逆", "拟", "腻", "妮"]),
    ("hao", &["好", "号", "毫", "豪", "耗"]),
    ("nihao", &["你好", "拟好"]),
    ("zhong", &["中", "种", "重", "众", "钟", "终"]),
    ("wen", &["文", "问", "闻", "稳", "温", "吻", "纹"]),
    ("zhongwen", &["中文"]),
    (
        "shi",
        &["是", "时", "事", "十", "使", "市", "世", "式", "实", "师", "试", "视"],
    ),
];

/// One recorded engine entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCall {
    pub name: &'static str,
    pub thread: ThreadId,
}

#[derive(Default)]
struct ProbeInner {
    calls: Mutex<Vec<ProbeCall>>,
    active: AtomicUsize,
    overlaps: AtomicUsize,
    failures: Mutex<VecDeque<(&'static str, String)>>,
    startup_failure: Mutex<Option<String>>,
    startup_delay: Mutex<Option<Duration>>,
    withheld_contexts: AtomicUsize,
    injected: Mutex<Vec<RawNotification>>,
}

/// Test probe shared between a test and the engine it observes
///
/// Cheap to clone; all clones observe the same engine(s).
#[derive(Clone, Default)]
pub struct EngineProbe {
    inner: Arc<ProbeInner>,
}

impl EngineProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all engine calls, in the order they happened
    pub fn calls(&self) -> Vec<&'static str> {
        self.inner.calls.lock().iter().map(|c| c.name).collect()
    }

    /// Full call records including the calling thread
    pub fn records(&self) -> Vec<ProbeCall> {
        self.inner.calls.lock().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.inner.calls.lock().iter().filter(|c| c.name == name).count()
    }

    /// Distinct threads the engine was entered from
    pub fn threads(&self) -> HashSet<ThreadId> {
        self.inner.calls.lock().iter().map(|c| c.thread).collect()
    }

    /// Number of entries that started while another entry was still running
    pub fn overlaps(&self) -> usize {
        self.inner.overlaps.load(Ordering::SeqCst)
    }

    /// Make the next call named `call` return an error
    pub fn fail_next(&self, call: &'static str, message: impl Into<String>) {
        self.inner.failures.lock().push_back((call, message.into()));
    }

    /// Make every subsequent startup fail
    pub fn fail_startup(&self, message: impl Into<String>) {
        *self.inner.startup_failure.lock() = Some(message.into());
    }

    pub fn clear_startup_failure(&self) {
        *self.inner.startup_failure.lock() = None;
    }

    /// Block the worker thread for `delay` during startup
    pub fn delay_startup(&self, delay: Duration) {
        *self.inner.startup_delay.lock() = Some(delay);
    }

    pub fn clear_startup_delay(&self) {
        *self.inner.startup_delay.lock() = None;
    }

    /// Make the next `context()` call report no context
    pub fn withhold_next_context(&self) {
        self.inner.withheld_contexts.fetch_add(1, Ordering::SeqCst);
    }

    /// Queue a notification as if the engine had emitted it
    pub fn inject_notification(&self, raw: RawNotification) {
        self.inner.injected.lock().push(raw);
    }

    fn enter(&self, name: &'static str) -> ProbeGuard {
        if self.inner.active.fetch_add(1, Ordering::SeqCst) != 0 {
            self.inner.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.calls.lock().push(ProbeCall {
            name,
            thread: std::thread::current().id(),
        });
        ProbeGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    fn take_failure(&self, name: &'static str) -> Option<EngineError> {
        let mut failures = self.inner.failures.lock();
        let pos = failures.iter().position(|(call, _)| *call == name)?;
        let (call, message) = failures.remove(pos)?;
        Some(EngineError::Call { call, message })
    }

    fn take_withheld_context(&self) -> bool {
        self.inner
            .withheld_contexts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Marks one engine entry; owns its probe handle so the engine stays mutable
struct ProbeGuard {
    inner: Arc<ProbeInner>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory composition engine
pub struct MemoryEngine {
    probe: EngineProbe,
    page_size: usize,
    running: bool,
    schemas: Vec<SchemaItem>,
    enabled: Vec<String>,
    current: String,
    options: HashMap<String, bool>,
    input: Vec<char>,
    caret: usize,
    page: usize,
    highlighted: usize,
    forgotten: HashSet<String>,
    pending_commit: Option<String>,
    notifications: Vec<RawNotification>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_probe(EngineProbe::new())
    }

    pub fn with_probe(probe: EngineProbe) -> Self {
        let schemas = vec![
            SchemaItem::new("luna_pinyin", "Luna Pinyin"),
            SchemaItem::new("bopomofo", "Bopomofo"),
            SchemaItem::new("cangjie5", "Cangjie 5"),
        ];
        Self {
            probe,
            page_size: DEFAULT_PAGE_SIZE,
            running: false,
            enabled: vec!["luna_pinyin".to_string(), "bopomofo".to_string()],
            current: "luna_pinyin".to_string(),
            schemas,
            options: HashMap::new(),
            input: Vec::new(),
            caret: 0,
            page: 0,
            highlighted: 0,
            forgotten: HashSet::new(),
            pending_commit: None,
            notifications: Vec::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Factory producing engines that all report to `probe`
    pub fn factory(probe: EngineProbe) -> impl EngineFactory {
        move || -> EngineResult<Box<dyn EngineBackend>> { Ok(Box::new(MemoryEngine::with_probe(probe.clone()))) }
    }

    fn check(&self, call: &'static str) -> EngineResult<()> {
        if let Some(err) = self.probe.take_failure(call) {
            debug!(call, "MemoryEngine: injected failure");
            return Err(err);
        }
        if !self.running {
            return Err(EngineError::NotRunning);
        }
        Ok(())
    }

    fn is_composing(&self) -> bool {
        !self.input.is_empty()
    }

    fn option(&self, name: &str) -> bool {
        self.options.get(name).copied().unwrap_or(false)
    }

    fn raw_input(&self) -> String {
        self.input.iter().collect()
    }

    fn all_candidates(&self) -> Vec<CandidateItem> {
        if self.input.is_empty() {
            return Vec::new();
        }
        let input = self.raw_input();
        let words: Vec<CandidateItem> = match DICTIONARY.iter().find(|(code, _)| *code == input) {
            Some((_, words)) => words.iter().map(|w| CandidateItem::new(*w, "")).collect(),
            None => vec![CandidateItem::new(input.clone(), "")],
        };
        words.into_iter().filter(|c| !self.forgotten.contains(&c.text)).collect()
    }

    fn schema_name(&self, id: &str) -> String {
        self.schemas
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    fn notify(&mut self, message_type: &str, message_value: String) {
        self.notifications.push(RawNotification::new(message_type, message_value));
    }

    fn reset_composition(&mut self) {
        self.input.clear();
        self.caret = 0;
        self.page = 0;
        self.highlighted = 0;
    }

    fn commit_text(&mut self, text: String) {
        self.pending_commit = Some(text);
        self.reset_composition();
    }

    fn select_absolute(&mut self, index: usize) -> bool {
        let candidates = self.all_candidates();
        match candidates.get(index) {
            Some(candidate) => {
                self.commit_text(candidate.text.clone());
                true
            }
            None => false,
        }
    }

    fn page_bounds(&self, total: usize) -> (usize, usize) {
        let start = self.page * self.page_size;
        (start, (start + self.page_size).min(total))
    }

    fn page_to_absolute(&self, index: usize) -> Option<usize> {
        let (start, end) = self.page_bounds(self.all_candidates().len());
        let absolute = start + index;
        (index < self.page_size && absolute < end).then_some(absolute)
    }

    fn forget_absolute(&mut self, index: usize) -> bool {
        let candidates = self.all_candidates();
        let Some(candidate) = candidates.get(index) else {
            return false;
        };
        self.forgotten.insert(candidate.text.clone());
        let remaining = candidates.len() - 1;
        if remaining == 0 {
            self.page = 0;
            self.highlighted = 0;
        } else {
            self.highlighted = self.highlighted.min(remaining - 1);
            self.page = self.page.min((remaining - 1) / self.page_size);
        }
        true
    }

    fn turn_page(&mut self, backward: bool) -> bool {
        if !self.is_composing() {
            return false;
        }
        let total = self.all_candidates().len();
        if backward {
            if self.page == 0 {
                return false;
            }
            self.page -= 1;
        } else {
            if (self.page + 1) * self.page_size >= total {
                return false;
            }
            self.page += 1;
        }
        self.highlighted = self.page * self.page_size;
        true
    }

    fn set_option(&mut self, name: &str, value: bool) {
        self.options.insert(name.to_string(), value);
        let message = if value { name.to_string() } else { format!("!{name}") };
        self.notify("option", message);
    }

    fn handle_key(&mut self, keycode: i32, mask: u32) -> bool {
        let modifiers = KeyModifiers::from_bits_truncate(mask);
        if modifiers.contains(KeyModifiers::RELEASE) {
            return false;
        }
        if keycode == keys::SHIFT_L || keycode == keys::SHIFT_R {
            let ascii = !self.option("ascii_mode");
            self.set_option("ascii_mode", ascii);
            return true;
        }
        if modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER) {
            return false;
        }

        let composing = self.is_composing();
        match keycode {
            0x61..=0x7a if !self.option("ascii_mode") => {
                let c = keycode as u8 as char;
                self.input.insert(self.caret, c);
                self.caret += 1;
                self.page = 0;
                self.highlighted = 0;
                true
            }
            keys::BACKSPACE if composing => {
                if self.caret > 0 {
                    self.caret -= 1;
                    self.input.remove(self.caret);
                    self.page = 0;
                    self.highlighted = 0;
                }
                true
            }
            keys::DELETE if composing => {
                if self.caret < self.input.len() {
                    self.input.remove(self.caret);
                    self.page = 0;
                    self.highlighted = 0;
                }
                true
            }
            keys::ESCAPE if composing => {
                self.reset_composition();
                true
            }
            keys::SPACE if composing => self.select_absolute(self.highlighted),
            keys::RETURN if composing => {
                let raw = self.raw_input();
                self.commit_text(raw);
                true
            }
            0x31..=0x39 if composing => {
                let index = (keycode - 0x31) as usize;
                match self.page_to_absolute(index) {
                    Some(absolute) => self.select_absolute(absolute),
                    None => false,
                }
            }
            keys::PAGE_DOWN | 0x3d if composing => {
                self.turn_page(false);
                true
            }
            keys::PAGE_UP | 0x2d if composing => {
                self.turn_page(true);
                true
            }
            keys::LEFT if composing => {
                self.caret = self.caret.saturating_sub(1);
                true
            }
            keys::RIGHT if composing => {
                self.caret = (self.caret + 1).min(self.input.len());
                true
            }
            keys::HOME if composing => {
                self.caret = 0;
                true
            }
            keys::END if composing => {
                self.caret = self.input.len();
                true
            }
            keys::UP if composing => {
                self.highlighted = self.highlighted.saturating_sub(1);
                self.page = self.highlighted / self.page_size;
                true
            }
            keys::DOWN if composing => {
                let total = self.all_candidates().len();
                if self.highlighted + 1 < total {
                    self.highlighted += 1;
                    self.page = self.highlighted / self.page_size;
                }
                true
            }
            _ => false,
        }
    }

    fn build_context(&self) -> Context {
        let candidates = self.all_candidates();
        let (start, end) = self.page_bounds(candidates.len());
        let preview = candidates
            .get(self.highlighted)
            .map(|c| c.text.clone())
            .unwrap_or_default();
        let input = self.raw_input();
        let length = self.input.len();
        Context {
            composition: Composition {
                length,
                cursor_pos: self.caret,
                sel_start: 0,
                sel_end: length,
                preedit: input.clone(),
                commit_text_preview: preview,
            },
            menu: CandidateMenu {
                page_size: self.page_size,
                page_number: self.page,
                is_last_page: end >= candidates.len(),
                highlighted_index: self.highlighted.saturating_sub(start),
                candidates: candidates.get(start..end).map(<[_]>::to_vec).unwrap_or_default(),
                select_keys: None,
            },
            input,
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBackend for MemoryEngine {
    fn startup(&mut self, params: &StartupParams) -> EngineResult<()> {
        let _guard = self.probe.enter("startup");
        debug!(shared_dir = %params.shared_dir.display(), user_dir = %params.user_dir.display(), full_check = params.full_check, "MemoryEngine::startup: called");
        let delay = *self.probe.inner.startup_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = self.probe.inner.startup_failure.lock().clone() {
            return Err(EngineError::Startup(message));
        }
        if params.full_check {
            self.notify("deploy", "start".to_string());
            self.notify("deploy", "success".to_string());
        }
        self.running = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        let _guard = self.probe.enter("shutdown");
        debug!("MemoryEngine::shutdown: called");
        self.running = false;
        self.reset_composition();
        self.pending_commit = None;
        self.notifications.clear();
    }

    fn process_key(&mut self, keycode: i32, mask: u32) -> EngineResult<bool> {
        let _guard = self.probe.enter("process_key");
        self.check("process_key")?;
        Ok(self.handle_key(keycode, mask))
    }

    fn simulate_key_sequence(&mut self, sequence: &str) -> EngineResult<bool> {
        let _guard = self.probe.enter("simulate_key_sequence");
        self.check("simulate_key_sequence")?;
        let Some(codes) = keys::parse_sequence(sequence) else {
            debug!(%sequence, "MemoryEngine::simulate_key_sequence: unparsable sequence");
            return Ok(false);
        };
        for code in codes {
            self.handle_key(code, 0);
        }
        Ok(true)
    }

    fn select_candidate(&mut self, index: usize) -> EngineResult<bool> {
        let _guard = self.probe.enter("select_candidate");
        self.check("select_candidate")?;
        Ok(self.select_absolute(index))
    }

    fn select_candidate_on_page(&mut self, index: usize) -> EngineResult<bool> {
        let _guard = self.probe.enter("select_candidate_on_page");
        self.check("select_candidate_on_page")?;
        Ok(match self.page_to_absolute(index) {
            Some(absolute) => self.select_absolute(absolute),
            None => false,
        })
    }

    fn delete_candidate_on_page(&mut self, index: usize) -> EngineResult<bool> {
        let _guard = self.probe.enter("delete_candidate_on_page");
        self.check("delete_candidate_on_page")?;
        Ok(match self.page_to_absolute(index) {
            Some(absolute) => self.forget_absolute(absolute),
            None => false,
        })
    }

    fn forget_candidate(&mut self, index: usize) -> EngineResult<bool> {
        let _guard = self.probe.enter("forget_candidate");
        self.check("forget_candidate")?;
        Ok(self.forget_absolute(index))
    }

    fn change_page(&mut self, backward: bool) -> EngineResult<bool> {
        let _guard = self.probe.enter("change_page");
        self.check("change_page")?;
        Ok(self.turn_page(backward))
    }

    fn set_caret_pos(&mut self, pos: usize) -> EngineResult<()> {
        let _guard = self.probe.enter("set_caret_pos");
        self.check("set_caret_pos")?;
        self.caret = pos.min(self.input.len());
        Ok(())
    }

    fn commit_composition(&mut self) -> EngineResult<bool> {
        let _guard = self.probe.enter("commit_composition");
        self.check("commit_composition")?;
        if !self.is_composing() {
            return Ok(false);
        }
        let text = self
            .all_candidates()
            .get(self.highlighted)
            .map(|c| c.text.clone())
            .unwrap_or_else(|| self.raw_input());
        self.commit_text(text);
        Ok(true)
    }

    fn clear_composition(&mut self) -> EngineResult<()> {
        let _guard = self.probe.enter("clear_composition");
        self.check("clear_composition")?;
        self.reset_composition();
        Ok(())
    }

    fn commit(&mut self) -> EngineResult<Option<Commit>> {
        let _guard = self.probe.enter("commit");
        self.check("commit")?;
        Ok(self.pending_commit.take().map(Commit::new))
    }

    fn context(&mut self) -> EngineResult<Option<Context>> {
        let _guard = self.probe.enter("context");
        self.check("context")?;
        if self.probe.take_withheld_context() {
            return Ok(None);
        }
        Ok(Some(self.build_context()))
    }

    fn status(&mut self) -> EngineResult<Option<Status>> {
        let _guard = self.probe.enter("status");
        self.check("status")?;
        Ok(Some(Status {
            schema_id: self.current.clone(),
            schema_name: self.schema_name(&self.current),
            is_disabled: false,
            is_composing: self.is_composing(),
            is_ascii_mode: self.option("ascii_mode"),
            is_full_shape: self.option("full_shape"),
            is_simplified: self.option("simplification"),
            is_traditional: self.option("traditional"),
            is_ascii_punct: self.option("ascii_punct"),
        }))
    }

    fn runtime_option(&mut self, name: &str) -> EngineResult<bool> {
        let _guard = self.probe.enter("runtime_option");
        self.check("runtime_option")?;
        Ok(self.option(name))
    }

    fn set_runtime_option(&mut self, name: &str, value: bool) -> EngineResult<()> {
        let _guard = self.probe.enter("set_runtime_option");
        self.check("set_runtime_option")?;
        self.set_option(name, value);
        Ok(())
    }

    fn available_schemas(&mut self) -> EngineResult<Vec<SchemaItem>> {
        let _guard = self.probe.enter("available_schemas");
        self.check("available_schemas")?;
        Ok(self.schemas.clone())
    }

    fn enabled_schemas(&mut self) -> EngineResult<Vec<SchemaItem>> {
        let _guard = self.probe.enter("enabled_schemas");
        self.check("enabled_schemas")?;
        Ok(self
            .enabled
            .iter()
            .filter_map(|id| self.schemas.iter().find(|s| &s.id == id).cloned())
            .collect())
    }

    fn set_enabled_schemas(&mut self, ids: &[String]) -> EngineResult<bool> {
        let _guard = self.probe.enter("set_enabled_schemas");
        self.check("set_enabled_schemas")?;
        if !ids.iter().all(|id| self.schemas.iter().any(|s| &s.id == id)) {
            return Ok(false);
        }
        self.enabled = ids.to_vec();
        if !self.enabled.contains(&self.current) {
            self.reset_composition();
            self.current = self
                .enabled
                .first()
                .cloned()
                .unwrap_or_else(|| EMPTY_SCHEMA_ID.to_string());
            let message = format!("{}/{}", self.current, self.schema_name(&self.current));
            self.notify("schema", message);
        }
        Ok(true)
    }

    fn current_schema(&mut self) -> EngineResult<String> {
        let _guard = self.probe.enter("current_schema");
        self.check("current_schema")?;
        Ok(self.current.clone())
    }

    fn select_schema(&mut self, id: &str) -> EngineResult<bool> {
        let _guard = self.probe.enter("select_schema");
        self.check("select_schema")?;
        if !self.enabled.iter().any(|enabled| enabled == id) {
            return Ok(false);
        }
        self.reset_composition();
        self.current = id.to_string();
        let message = format!("{}/{}", id, self.schema_name(id));
        self.notify("schema", message);
        Ok(true)
    }

    fn candidates(&mut self, start: usize, limit: usize) -> EngineResult<Vec<CandidateItem>> {
        let _guard = self.probe.enter("candidates");
        self.check("candidates")?;
        Ok(self.all_candidates().into_iter().skip(start).take(limit).collect())
    }

    fn sync_user_data(&mut self) -> EngineResult<bool> {
        let _guard = self.probe.enter("sync_user_data");
        self.check("sync_user_data")?;
        Ok(true)
    }

    fn take_notifications(&mut self) -> Vec<RawNotification> {
        let mut notifications = std::mem::take(&mut self.notifications);
        notifications.append(&mut self.probe.inner.injected.lock());
        notifications
    }
}
