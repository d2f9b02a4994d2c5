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

use distlock::commands::stock::{Reservation, STOCK_KEY_TEMPLATE, StockOptions, run_scenario};
use distlock::config::{LockConfig, StoreBackend};
use distlock::expression::EvaluationContext;
use distlock::locking::{CancellationToken, DistributedLock, LockInterceptor, LockRegistry};
use distlock::store::{self, LockStore};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Requester A holds the stock lock for 2s; B queues behind it and must see
/// A's decrement.
fn second_requester_sees_first_decrement(store: Arc<dyn LockStore>) {
    let registry = Arc::new(LockRegistry::new(store, LockConfig::default()));
    let interceptor = Arc::new(LockInterceptor::new(registry));
    let context = Arc::new(EvaluationContext::new().with_value("productId", "p1"));
    let stock = Arc::new(AtomicI64::new(5));

    let lock_a = DistributedLock::builder(STOCK_KEY_TEMPLATE)
        .lease(Duration::from_secs(60))
        .build()
        .unwrap();
    let lock_b = DistributedLock::builder(STOCK_KEY_TEMPLATE)
        .wait(Duration::from_secs(10))
        .lease(Duration::from_secs(60))
        .build()
        .unwrap();

    let (held_tx, held_rx) = mpsc::channel();
    let requester_a = {
        let interceptor = interceptor.clone();
        let context = context.clone();
        let stock = stock.clone();
        thread::spawn(move || {
            interceptor
                .execute(&lock_a, &context, &CancellationToken::new(), || {
                    held_tx.send(()).unwrap();
                    let before = stock.load(Ordering::SeqCst);
                    thread::sleep(Duration::from_secs(2));
                    stock.store(before - 1, Ordering::SeqCst);
                })
                .unwrap();
        })
    };
    held_rx.recv().unwrap();

    let waited_from = Instant::now();
    let observed = interceptor
        .execute(&lock_b, &context, &CancellationToken::new(), || {
            let before = stock.load(Ordering::SeqCst);
            stock.store(before - 1, Ordering::SeqCst);
            (before, waited_from.elapsed())
        })
        .unwrap();
    requester_a.join().unwrap();

    assert_eq!(observed.0, 4, "B must see A's decrement");
    assert!(observed.1 >= Duration::from_millis(1500), "B entered after {:?}", observed.1);
    assert_eq!(stock.load(Ordering::SeqCst), 3);
}

#[test]
fn stock_is_serialized_with_memory_store() {
    second_requester_sees_first_decrement(Arc::new(store::MemoryLockStore::new()));
}

#[test]
fn stock_is_serialized_with_file_store() {
    let temp = TempDir::new().unwrap();
    second_requester_sees_first_decrement(Arc::new(
        store::FileLockStore::open(temp.path()).unwrap(),
    ));
}

#[test]
fn demo_scenario_runs_against_configured_file_store() {
    let temp = TempDir::new().unwrap();
    let mut config = LockConfig::default();
    config.store.backend = StoreBackend::File;
    config.store.directory = Some(temp.path().join("locks"));

    let options = StockOptions {
        requesters: 4,
        initial_stock: 3,
        hold: Duration::from_millis(20),
        wait: Duration::from_secs(10),
        ..StockOptions::default()
    };
    let outcomes = run_scenario(&config, &options, &CancellationToken::new()).unwrap();

    let reserved = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Reservation::Reserved { .. }))
        .count();
    assert_eq!(reserved, 3);
    assert!(outcomes.contains(&Reservation::SoldOut));
}
