//! Simulation statistics collection and reporting.
//!
//! Components never reach into a global statistics object. Every callback
//! receives a `&mut dyn StatsSink` and records named counters and samples
//! through it. `SimStats` is the sink used by the simulator; it keeps the
//! values in name order, prints a summary and serialises to JSON.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use crate::common::Tick;

/// Destination for statistics recorded by simulated components.
pub trait StatsSink {
    /// Adds `by` to the named counter.
    fn incr(&mut self, name: &str, by: u64);

    /// Records one sample of the named distribution.
    fn sample(&mut self, name: &str, value: u64);
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStats;

impl StatsSink for NullStats {
    fn incr(&mut self, _name: &str, _by: u64) {}

    fn sample(&mut self, _name: &str, _value: u64) {}
}

/// Fixed-width histogram buckets.
#[derive(Clone, Debug, Serialize)]
pub struct Buckets {
    pub min: u64,
    pub max: u64,
    pub bucket_size: u64,
    pub counts: Vec<u64>,
    pub underflows: u64,
    pub overflows: u64,
}

/// Summary of a sampled quantity, with optional histogram buckets.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Distribution {
    pub samples: u64,
    pub sum: u64,
    pub min_value: Option<u64>,
    pub max_value: Option<u64>,
    pub buckets: Option<Buckets>,
}

impl Distribution {
    /// Creates a distribution with buckets of `bucket_size` covering `[min, max]`.
    pub fn with_buckets(min: u64, max: u64, bucket_size: u64) -> Self {
        let bucket_size = bucket_size.max(1);
        let n = (max.saturating_sub(min) / bucket_size + 1) as usize;
        Self {
            buckets: Some(Buckets {
                min,
                max,
                bucket_size,
                counts: vec![0; n],
                underflows: 0,
                overflows: 0,
            }),
            ..Default::default()
        }
    }

    /// Records one sample.
    pub fn sample(&mut self, value: u64) {
        self.samples += 1;
        self.sum = self.sum.saturating_add(value);
        self.min_value = Some(self.min_value.map_or(value, |m| m.min(value)));
        self.max_value = Some(self.max_value.map_or(value, |m| m.max(value)));

        if let Some(b) = self.buckets.as_mut() {
            if value < b.min {
                b.underflows += 1;
            } else if value > b.max {
                b.overflows += 1;
            } else {
                let idx = ((value - b.min) / b.bucket_size) as usize;
                let last = b.counts.len() - 1;
                b.counts[idx.min(last)] += 1;
            }
        }
    }

    /// Arithmetic mean of all samples, zero when empty.
    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sum as f64 / self.samples as f64
        }
    }

    fn clear(&mut self) {
        self.samples = 0;
        self.sum = 0;
        self.min_value = None;
        self.max_value = None;
        if let Some(b) = self.buckets.as_mut() {
            b.counts.iter_mut().for_each(|c| *c = 0);
            b.underflows = 0;
            b.overflows = 0;
        }
    }
}

/// Statistics registry for one simulation run.
#[derive(Clone, Debug, Serialize)]
pub struct SimStats {
    #[serde(skip)]
    start_time: Instant,
    pub counters: BTreeMap<String, u64>,
    pub distributions: BTreeMap<String, Distribution>,
}

impl Default for SimStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            counters: BTreeMap::new(),
            distributions: BTreeMap::new(),
        }
    }
}

impl StatsSink for SimStats {
    fn incr(&mut self, name: &str, by: u64) {
        match self.counters.get_mut(name) {
            Some(v) => *v += by,
            None => {
                self.counters.insert(name.to_string(), by);
            }
        }
    }

    fn sample(&mut self, name: &str, value: u64) {
        match self.distributions.get_mut(name) {
            Some(d) => d.sample(value),
            None => {
                let mut d = Distribution::default();
                d.sample(value);
                self.distributions.insert(name.to_string(), d);
            }
        }
    }
}

impl SimStats {
    /// Declares a bucketed distribution. Samples recorded under a name that
    /// was never declared only keep count, sum, min and max.
    pub fn register_distribution(&mut self, name: &str, min: u64, max: u64, bucket_size: u64) {
        self.distributions
            .insert(name.to_string(), Distribution::with_buckets(min, max, bucket_size));
    }

    /// Value of a counter, zero if it was never incremented.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Looks up a distribution by name.
    pub fn distribution(&self, name: &str) -> Option<&Distribution> {
        self.distributions.get(name)
    }

    /// Zeroes every statistic while keeping declared bucket layouts.
    pub fn reset(&mut self) {
        self.counters.values_mut().for_each(|v| *v = 0);
        self.distributions.values_mut().for_each(Distribution::clear);
        self.start_time = Instant::now();
    }

    /// Serialises all statistics as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Prints a formatted summary of all statistics.
    ///
    /// # Arguments
    ///
    /// * `sim_ticks` - Simulated time reached by the run.
    pub fn print(&self, sim_ticks: Tick) {
        let seconds = self.start_time.elapsed().as_secs_f64();

        println!("\n==========================================================");
        println!("CXL MEMORY LINK STATISTICS");
        println!("==========================================================");
        println!("host_seconds             {:.4} s", seconds);
        println!("sim_ticks                {}", sim_ticks);
        println!("sim_ns                   {:.3}", sim_ticks as f64 / 1000.0);

        let mut section = "";
        for (name, value) in &self.counters {
            let group = name.split('.').next().unwrap_or("");
            if group != section {
                section = group;
                println!("----------------------------------------------------------");
                println!("{}", section.to_uppercase());
            }
            println!("  {:<40} {}", name, value);
        }

        println!("----------------------------------------------------------");
        println!("DISTRIBUTIONS");
        for (name, d) in &self.distributions {
            if d.samples == 0 {
                continue;
            }
            println!(
                "  {:<40} samples: {:<8} | mean: {:<12.2} | min: {:<10} | max: {}",
                name,
                d.samples,
                d.mean(),
                d.min_value.unwrap_or(0),
                d.max_value.unwrap_or(0)
            );
        }
        println!("==========================================================");
    }
}
