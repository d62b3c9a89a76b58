use std::{
  any::Any,
  panic::{self, AssertUnwindSafe},
};

use rayon::prelude::*;

use crate::error::{EnhanceError, Result};

/// What became of one task handed to [`WorkerPool::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
  Done(T),
  Panicked(String),
}

impl<T> TaskOutcome<T> {
  pub fn done(self) -> Option<T> {
    match self {
      TaskOutcome::Done(v) => Some(v),
      TaskOutcome::Panicked(_) => None,
    }
  }
}

/// A dedicated, bounded thread pool.
///
/// Tasks never take down the pool or their siblings: a panicking task is
/// reported as [`TaskOutcome::Panicked`].
pub struct WorkerPool {
  pool: rayon::ThreadPool,
  size: usize,
}

impl WorkerPool {
  /// `size == 0` uses one worker per logical CPU.
  pub fn new(size: usize) -> Result<Self> {
    let size = if size == 0 { num_cpus::get() } else { size };

    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(size)
      .thread_name(|i| format!("enhancer-worker-{i}"))
      .build()
      .map_err(|err| EnhanceError::InvalidConfig(format!("failed to build worker pool: {err}")))?;

    tracing::debug!(size, "Worker pool ready");

    Ok(Self { pool, size })
  }

  pub fn size(&self) -> usize {
    self.size
  }

  /// Runs `f` on every task and returns the outcomes in task order.
  pub fn run<I, T, F>(&self, tasks: Vec<I>, f: F) -> Vec<TaskOutcome<T>>
  where
    I: Send,
    T: Send,
    F: Fn(I) -> T + Sync + Send,
  {
    self.pool.install(|| {
      tasks
        .into_par_iter()
        .map(|task| match panic::catch_unwind(AssertUnwindSafe(|| f(task))) {
          Ok(v) => TaskOutcome::Done(v),
          Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
        })
        .collect()
    })
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_owned()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic payload".to_owned()
  }
}

#[cfg(test)]
mod tests {
  use std::{
    collections::HashSet,
    sync::Mutex,
    thread,
    time::Duration,
  };

  use super::*;

  #[test]
  fn keeps_task_order() {
    let pool = WorkerPool::new(4).unwrap();
    let out = pool.run((0..64u64).collect(), |i| {
      // finish out of order
      thread::sleep(Duration::from_micros((64 - i) * 50));
      i * 2
    });

    let values: Vec<u64> = out.into_iter().filter_map(TaskOutcome::done).collect();
    assert_eq!(values, (0..64).map(|i| i * 2).collect::<Vec<_>>());
  }

  #[test]
  fn panics_are_contained() {
    let pool = WorkerPool::new(2).unwrap();
    let out = pool.run(vec![1, 2, 3], |i| {
      if i == 2 {
        panic!("task {i} exploded");
      }
      i
    });

    assert_eq!(out[0], TaskOutcome::Done(1));
    assert_eq!(out[1], TaskOutcome::Panicked("task 2 exploded".to_owned()));
    assert_eq!(out[2], TaskOutcome::Done(3));
  }

  #[test]
  fn bounded_by_size() {
    let pool = WorkerPool::new(2).unwrap();
    assert_eq!(pool.size(), 2);

    let names = Mutex::new(HashSet::new());
    pool.run((0..32).collect(), |_: i32| {
      let name = thread::current().name().map(str::to_owned);
      names.lock().unwrap().insert(name);
      thread::sleep(Duration::from_millis(1));
    });

    assert!(names.lock().unwrap().len() <= 2);
  }

  #[test]
  fn zero_means_every_cpu() {
    assert_eq!(WorkerPool::new(0).unwrap().size(), num_cpus::get());
  }
}
