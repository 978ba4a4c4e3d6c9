// Due tasks run in variant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskKind {
    Identify,
    Effect,
    Fade,
    PersistFlush,
}

#[derive(Debug, Clone, Copy)]
struct ScheduledTask {
    kind: TaskKind,
    due_ms: u64,
    interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    tasks: Vec<ScheduledTask>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_every(&mut self, kind: TaskKind, interval_ms: u64, now_ms: u64) {
        if self.is_scheduled(kind) {
            return;
        }
        self.schedule_every(kind, interval_ms, now_ms);
    }

    pub fn schedule_every(&mut self, kind: TaskKind, interval_ms: u64, now_ms: u64) {
        let interval_ms = interval_ms.max(1);
        self.insert(ScheduledTask {
            kind,
            due_ms: now_ms.saturating_add(interval_ms),
            interval_ms: Some(interval_ms),
        });
    }

    pub fn schedule_once(&mut self, kind: TaskKind, delay_ms: u64, now_ms: u64) {
        self.insert(ScheduledTask {
            kind,
            due_ms: now_ms.saturating_add(delay_ms),
            interval_ms: None,
        });
    }

    pub fn cancel(&mut self, kind: TaskKind) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.kind != kind);
        self.tasks.len() != before
    }

    pub fn cancel_all(&mut self) {
        self.tasks.clear();
    }

    pub fn is_scheduled(&self, kind: TaskKind) -> bool {
        self.tasks.iter().any(|task| task.kind == kind)
    }

    pub fn next_due_ms(&self) -> Option<u64> {
        self.tasks.iter().map(|task| task.due_ms).min()
    }

    pub fn take_due(&mut self, now_ms: u64) -> Vec<TaskKind> {
        let mut due = Vec::new();

        self.tasks.retain_mut(|task| {
            if task.due_ms > now_ms {
                return true;
            }
            due.push(task.kind);
            match task.interval_ms {
                Some(interval_ms) => {
                    let next = task.due_ms.saturating_add(interval_ms);
                    task.due_ms = if next <= now_ms {
                        now_ms.saturating_add(interval_ms)
                    } else {
                        next
                    };
                    true
                }
                None => false,
            }
        });

        due.sort();
        due
    }

    fn insert(&mut self, task: ScheduledTask) {
        self.cancel(task.kind);
        self.tasks.push(task);
    }
}
