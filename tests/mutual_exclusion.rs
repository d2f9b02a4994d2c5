// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod common;

use common::memory_interceptor;
use distlock::config::LockConfig;
use distlock::expression::EvaluationContext;
use distlock::locking::{
    CancellationToken, DistributedLock, LockInterceptor, LockRegistry, LockType,
};
use distlock::store::FileLockStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const CONTENDERS: usize = 8;

/// Runs CONTENDERS critical sections on one key and returns the peak overlap.
fn peak_overlap(interceptors: Vec<Arc<LockInterceptor>>, kind: LockType) -> usize {
    let lock = Arc::new(
        DistributedLock::builder("'inventory:' + #sku")
            .lock_type(kind)
            .wait(Duration::from_secs(20))
            .lease(Duration::from_secs(30))
            .build()
            .unwrap(),
    );
    let context = Arc::new(EvaluationContext::new().with_value("sku", "A-1"));
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(CONTENDERS));

    let workers: Vec<_> = (0..CONTENDERS)
        .map(|index| {
            let interceptor = interceptors[index % interceptors.len()].clone();
            let lock = lock.clone();
            let context = context.clone();
            let inside = inside.clone();
            let peak = peak.clone();
            let completed = completed.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                interceptor
                    .execute(&lock, &context, &CancellationToken::new(), || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(15));
                        inside.fetch_sub(1, Ordering::SeqCst);
                        completed.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), CONTENDERS);
    peak.load(Ordering::SeqCst)
}

#[test]
fn exclusive_kinds_never_overlap_in_memory() {
    for kind in [LockType::Reentrant, LockType::Fair, LockType::Write] {
        let (interceptor, _store) = memory_interceptor(LockConfig::default());
        assert_eq!(peak_overlap(vec![Arc::new(interceptor)], kind), 1, "{kind}");
    }
}

#[test]
fn file_store_excludes_across_independent_instances() {
    let temp = TempDir::new().unwrap();
    let interceptors: Vec<_> = (0..2)
        .map(|_| {
            let store = Arc::new(FileLockStore::open(temp.path()).unwrap());
            let registry = Arc::new(LockRegistry::new(store, LockConfig::default()));
            Arc::new(LockInterceptor::new(registry))
        })
        .collect();

    assert_eq!(peak_overlap(interceptors, LockType::Write), 1);
}

#[test]
fn different_keys_do_not_contend() {
    let (interceptor, _store) = memory_interceptor(LockConfig::default());
    let interceptor = Arc::new(interceptor);
    let lock = Arc::new(
        DistributedLock::builder("'order:' + #id")
            .wait(Duration::ZERO)
            .build()
            .unwrap(),
    );
    let barrier = Arc::new(Barrier::new(4));

    let workers: Vec<_> = (0..4)
        .map(|id| {
            let interceptor = interceptor.clone();
            let lock = lock.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let context = EvaluationContext::new().with_value("id", id);
                interceptor.execute(&lock, &context, &CancellationToken::new(), || {
                    barrier.wait();
                })
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap().unwrap();
    }
}
