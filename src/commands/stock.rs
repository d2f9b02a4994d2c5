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

//! Stock reservation demo: several requesters decrement one product's stock
//! through a read-modify-write that is only correct under the lock.

use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::expression::{EvaluationContext, resolve};
use crate::locking::{
    CancellationToken, DistributedLock, LockInterceptor, LockRegistry, global_token,
};
use crate::store;
use log::info;
use std::sync::atomic::{AtomicI64, Ordering};
use std::panic;
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const STOCK_KEY_TEMPLATE: &str = "'product:' + #productId + ':stock'";

#[derive(Debug, Clone)]
pub struct StockOptions {
    pub product: String,
    pub requesters: usize,
    pub initial_stock: i64,
    pub hold: Duration,
    pub wait: Duration,
    pub lease: Duration,
}

impl Default for StockOptions {
    fn default() -> Self {
        Self {
            product: "p1".to_string(),
            requesters: 2,
            initial_stock: 10,
            hold: Duration::from_secs(2),
            wait: Duration::from_secs(10),
            lease: Duration::from_secs(60),
        }
    }
}

/// What one requester saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    Reserved { before: i64, after: i64 },
    SoldOut,
    Failed(String),
}

pub struct StockCommand<'a> {
    config: &'a LockConfig,
}

impl<'a> StockCommand<'a> {
    pub fn new(config: &'a LockConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn execute(&self, options: &StockOptions) -> Result<()> {
        let outcomes = run_scenario(self.config, options, &global_token())?;
        let mut failures = 0;
        for (index, outcome) in outcomes.iter().enumerate() {
            match outcome {
                Reservation::Reserved { before, after } => {
                    println!("requester {}: reserved, stock {before} -> {after}", index + 1)
                }
                Reservation::SoldOut => println!("requester {}: sold out", index + 1),
                Reservation::Failed(reason) => {
                    failures += 1;
                    println!("requester {}: {reason}", index + 1)
                }
            }
        }
        if failures > 0 {
            let context = stock_context(&options.product);
            return Err(LockError::AcquisitionFailed {
                key: resolve(STOCK_KEY_TEMPLATE, &context)?,
                message: format!("{failures} requester(s) did not get the lock"),
                waited_secs: options.wait.as_secs_f64(),
            });
        }
        Ok(())
    }
}

/// Runs the requesters concurrently and returns their outcomes in spawn order.
pub fn run_scenario(
    config: &LockConfig,
    options: &StockOptions,
    cancellation: &CancellationToken,
) -> Result<Vec<Reservation>> {
    let store = store::from_config(config)?;
    let registry = Arc::new(LockRegistry::new(store, config.clone()));
    let interceptor = Arc::new(LockInterceptor::new(registry));
    let lock = Arc::new(
        DistributedLock::builder(STOCK_KEY_TEMPLATE)
            .wait(options.wait)
            .lease(options.lease)
            .failure_message("Product stock is being updated, try again later")
            .build()?,
    );
    let context = Arc::new(stock_context(&options.product));
    let stock = Arc::new(AtomicI64::new(options.initial_stock));
    let barrier = Arc::new(Barrier::new(options.requesters.max(1)));

    let workers: Vec<_> = (0..options.requesters.max(1))
        .map(|index| {
            let interceptor = Arc::clone(&interceptor);
            let lock = Arc::clone(&lock);
            let context = Arc::clone(&context);
            let stock = Arc::clone(&stock);
            let barrier = Arc::clone(&barrier);
            let cancellation = cancellation.clone();
            let hold = options.hold;
            thread::spawn(move || {
                barrier.wait();
                let outcome = interceptor.execute(&lock, &context, &cancellation, || {
                    let before = stock.load(Ordering::SeqCst);
                    if before <= 0 {
                        return Reservation::SoldOut;
                    }
                    info!("Requester {} holds the stock lock, stock = {before}", index + 1);
                    thread::sleep(hold);
                    stock.store(before - 1, Ordering::SeqCst);
                    Reservation::Reserved {
                        before,
                        after: before - 1,
                    }
                });
                match outcome {
                    Ok(reservation) => Ok(reservation),
                    Err(err @ (LockError::AcquisitionFailed { .. } | LockError::Interrupted { .. })) => {
                        Ok(Reservation::Failed(err.to_string()))
                    }
                    Err(err) => Err(err),
                }
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(workers.len());
    for worker in workers {
        outcomes.push(join_requester(worker)?);
    }
    Ok(outcomes)
}

fn stock_context(product: &str) -> EvaluationContext {
    EvaluationContext::new().with_value("productId", product)
}

/// Waits for a requester; a panic inside it is re-raised on this thread.
fn join_requester(worker: JoinHandle<Result<Reservation>>) -> Result<Reservation> {
    match worker.join() {
        Ok(outcome) => outcome,
        Err(payload) => panic::resume_unwind(payload),
    }
}
