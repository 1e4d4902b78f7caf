use std::time::Duration;

use serde::Serialize;
use tokio::sync::OwnedRwLockWriteGuard;
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;

use super::lessons::{normalize_spec, LessonTable};
use super::{Engine, EngineError, Pending};

enum Undo {
    Created(Id),
    Deleted(Lesson),
}

/// A commit record handed to the WAL writer, with the undo log needed if the
/// write fails.
struct Queued {
    pending: Pending,
    undo: Vec<Undo>,
}

/// Unit of work over the lesson table.
///
/// Holds the table's write lock for its whole life, so readers only ever see
/// committed state. Changes apply in place and are undone if the transaction
/// is dropped without a successful `commit`.
pub struct Transaction<'e> {
    engine: &'e Engine,
    table: OwnedRwLockWriteGuard<LessonTable>,
    staged: Vec<Event>,
    undo: Vec<Undo>,
}

/// Outcome of a group re-import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub removed: usize,
    pub lessons: Vec<Lesson>,
}

impl Engine {
    pub async fn begin(&self) -> Transaction<'_> {
        let table = self.lessons.clone().write_owned().await;
        Transaction {
            engine: self,
            table,
            staged: Vec::new(),
            undo: Vec::new(),
        }
    }

    /// Single-statement `Transaction::upsert_lesson`.
    pub async fn upsert_lesson(
        &self,
        spec: LessonSpec,
        policy: TeacherMatch,
    ) -> Result<Lesson, EngineError> {
        let mut tx = self.begin().await;
        let lesson = tx.upsert_lesson(spec, policy)?;
        tx.commit().await?;
        Ok(lesson)
    }

    pub async fn delete_lesson(&self, cmd: &LessonDelete) -> Result<usize, EngineError> {
        let mut tx = self.begin().await;
        let removed = tx.delete_lesson(cmd)?;
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn clear_group_schedule(&self, group_name: &str) -> Result<usize, EngineError> {
        let mut tx = self.begin().await;
        let removed = tx.clear_group_schedule(group_name);
        tx.commit().await?;
        Ok(removed)
    }

    /// Term re-import: clear the group and upsert every spec in one transaction.
    ///
    /// Every spec must belong to a group named `group_name`. If `deadline`
    /// elapses before the commit is queued, nothing is applied. Once queued,
    /// the import completes and its summary is returned.
    pub async fn replace_group_schedule(
        &self,
        group_name: &str,
        specs: Vec<LessonSpec>,
        policy: TeacherMatch,
        deadline: Option<Duration>,
    ) -> Result<ImportSummary, EngineError> {
        if specs.len() > MAX_IMPORT_LESSONS {
            return Err(EngineError::LimitExceeded("too many lessons in import"));
        }
        let group_ids = self.group_ids_named(group_name);
        if specs.iter().any(|s| !group_ids.contains(&s.group_id)) {
            return Err(EngineError::InvalidInput("lesson belongs to a different group"));
        }

        // The deadline covers staging and queueing only. A queued record is
        // written regardless, so waiting for it happens outside the timeout.
        let work = async {
            let mut tx = self.begin().await;
            let removed = tx.clear_group_schedule(group_name);
            let mut lessons = Vec::with_capacity(specs.len());
            for spec in specs {
                lessons.push(tx.upsert_lesson(spec, policy)?);
            }
            let queued = tx.queue().await?;
            Ok::<_, EngineError>((tx, queued, ImportSummary { removed, lessons }))
        };

        let (mut tx, queued, summary) = match deadline {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| EngineError::DeadlineExceeded)??,
            None => work.await?,
        };
        tx.settle(queued).await?;
        info!(
            group = group_name,
            removed = summary.removed,
            imported = summary.lessons.len(),
            "group schedule replaced"
        );
        Ok(summary)
    }
}

impl Transaction<'_> {
    /// Return the lesson matching `spec`, inserting it if there is none.
    ///
    /// A match shares lesson type, group, discipline, room, call, weekday,
    /// subgroup and the exact weeks set; teachers are compared per `policy`.
    /// A match is returned unchanged.
    pub fn upsert_lesson(
        &mut self,
        spec: LessonSpec,
        policy: TeacherMatch,
    ) -> Result<Lesson, EngineError> {
        let spec = normalize_spec(spec)?;
        self.engine.check_lesson_refs(&spec)?;
        if let Some(existing) = self.table.find_match(&spec, policy) {
            return Ok(existing.clone());
        }

        let lesson = Lesson::from_spec(self.engine.next_id(), spec);
        self.table.insert(lesson.clone());
        self.undo.push(Undo::Created(lesson.id));
        self.staged.push(Event::LessonCreated(lesson.clone()));
        debug!(id = lesson.id, room = lesson.room_id, group = lesson.group_id, "lesson staged");
        Ok(lesson)
    }

    /// Remove the group's lessons at the given call slot and weekday.
    pub fn delete_lesson(&mut self, cmd: &LessonDelete) -> Result<usize, EngineError> {
        if cmd.weekday > 6 {
            return Err(EngineError::InvalidInput("weekday must be 0..=6"));
        }
        let call_key = (cmd.time_start, cmd.time_end, cmd.num);
        let Some(call) = self.engine.refs.calls.find(&call_key) else {
            return Ok(0);
        };
        let ids: Vec<Id> = self
            .engine
            .group_ids_named(&cmd.group)
            .into_iter()
            .flat_map(|g| self.table.in_group(g))
            .filter(|l| l.call_id == call.id && l.weekday == cmd.weekday)
            .map(|l| l.id)
            .collect();
        Ok(self.remove_all(ids))
    }

    /// Remove every lesson of every group named `group_name`.
    pub fn clear_group_schedule(&mut self, group_name: &str) -> usize {
        let ids: Vec<Id> = self
            .engine
            .group_ids_named(group_name)
            .into_iter()
            .flat_map(|g| self.table.in_group(g))
            .map(|l| l.id)
            .collect();
        let removed = self.remove_all(ids);
        if removed > 0 {
            info!(group = group_name, removed, "group schedule cleared");
        }
        removed
    }

    /// The lesson table as this transaction sees it, staged changes included.
    pub fn lessons(&self) -> &LessonTable {
        &self.table
    }

    fn remove_all(&mut self, ids: Vec<Id>) -> usize {
        let mut removed = 0;
        for id in ids {
            if let Some(lesson) = self.table.remove(id) {
                self.staged.push(Event::LessonDeleted { id });
                self.undo.push(Undo::Deleted(lesson));
                removed += 1;
            }
        }
        removed
    }

    /// Persist every staged change as one WAL record.
    pub async fn commit(mut self) -> Result<(), EngineError> {
        let queued = self.queue().await?;
        self.settle(queued).await
    }

    /// Hand the staged changes to the WAL writer as one record. Until this
    /// returns, dropping the transaction rolls back; afterwards the changes
    /// stand unless the write itself fails in `settle`.
    async fn queue(&mut self) -> Result<Option<Queued>, EngineError> {
        let mut staged = std::mem::take(&mut self.staged);
        if staged.is_empty() {
            self.undo.clear();
            return Ok(None);
        }
        let record = if staged.len() == 1 {
            staged.remove(0)
        } else {
            Event::Committed(staged)
        };
        let pending = self.engine.wal_enqueue(record).await?;
        let undo = std::mem::take(&mut self.undo);
        Ok(Some(Queued { pending, undo }))
    }

    /// Wait for a queued record to be durable, undoing its changes if the
    /// write failed.
    async fn settle(&mut self, queued: Option<Queued>) -> Result<(), EngineError> {
        let Some(Queued { pending, undo }) = queued else {
            return Ok(());
        };
        if let Err(e) = super::wal_wait(pending).await {
            self.undo = undo;
            self.roll_back();
            return Err(e);
        }
        Ok(())
    }

    /// Discard every staged change.
    pub fn rollback(mut self) {
        self.roll_back();
    }

    fn roll_back(&mut self) {
        if !self.undo.is_empty() {
            debug!(changes = self.undo.len(), "rolling back transaction");
        }
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Created(id) => {
                    self.table.remove(id);
                }
                Undo::Deleted(lesson) => self.table.insert(lesson),
            }
        }
        self.staged.clear();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.roll_back();
    }
}
