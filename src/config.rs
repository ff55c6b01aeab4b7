//! Simulator Configuration.
//!
//! The configuration is a TOML document with one table per component:
//! `[general]`, `[bridge]`, `[device]`, `[controller]`, `[medium]` and
//! `[workload]`. Every field has a default, so an empty document describes
//! a DDR4-backed expander behind a host bridge.
//!
//! Latencies are written with a unit (`"50ns"`, `"7.8us"`, `"833ps"`), sizes
//! with a binary unit (`"2GiB"`, `"64B"`) and addresses as hex strings. Bare
//! integers are accepted too and are taken as ticks, bytes and addresses.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::common::{AddrRange, SimError, Tick, TICKS_PER_NS, TICKS_PER_US};
use crate::soc::memory::{DramTiming, NvmTiming};
use crate::soc::scheduler::{SchedulerParams, TurnPolicy};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub medium: MediumConfig,
    #[serde(default)]
    pub workload: WorkloadConfig,
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        text.parse()
    }

    /// Checks the cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), SimError> {
        fn check(ok: bool, msg: &str) -> Result<(), SimError> {
            if ok {
                Ok(())
            } else {
                Err(SimError::Param(msg.to_string()))
            }
        }

        check(self.general.clock > 0, "general.clock must be non-zero")?;

        let b = &self.bridge;
        check(b.req_fifo_depth > 0, "bridge.req_fifo_depth must be non-zero")?;
        check(b.resp_fifo_depth > 0, "bridge.resp_fifo_depth must be non-zero")?;
        check(b.cxl_size > 0, "bridge.cxl_size must be non-zero")?;
        check(
            b.cxl_base.checked_add(b.cxl_size).is_some(),
            "bridge.cxl_base + bridge.cxl_size overflows the address space",
        )?;

        let d = &self.device;
        check(d.req_fifo_depth > 0, "device.req_fifo_depth must be non-zero")?;
        check(d.resp_fifo_depth > 0, "device.resp_fifo_depth must be non-zero")?;

        let c = &self.controller;
        check(c.read_buffer_size > 0, "controller.read_buffer_size must be non-zero")?;
        check(c.write_buffer_size > 0, "controller.write_buffer_size must be non-zero")?;
        check(
            c.write_high_thresh_perc <= 100,
            "controller.write_high_thresh_perc must be at most 100",
        )?;
        check(
            c.write_low_thresh_perc <= c.write_high_thresh_perc,
            "controller.write_low_thresh_perc must not exceed write_high_thresh_perc",
        )?;
        check(c.priorities > 0, "controller.priorities must be non-zero")?;

        let (burst, row) = match self.medium.kind {
            MediumKind::Dram => {
                let t = &self.medium.dram;
                check(t.banks > 0, "medium.dram.banks must be non-zero")?;
                check(t.t_refi > t.t_rfc, "medium.dram.t_refi must exceed t_rfc")?;
                (t.burst_size, t.row_buffer_size)
            }
            MediumKind::Nvm => {
                let t = &self.medium.nvm;
                check(t.banks > 0, "medium.nvm.banks must be non-zero")?;
                check(
                    t.max_pending_writes > 0,
                    "medium.nvm.max_pending_writes must be non-zero",
                )?;
                (t.burst_size, t.row_buffer_size)
            }
        };
        check(burst.is_power_of_two(), "medium burst_size must be a power of two")?;
        check(row >= burst, "medium row_buffer_size must hold at least one burst")?;

        let w = &self.workload;
        check(w.size > 0, "workload.size must be non-zero")?;
        check(w.size <= b.cxl_size, "workload.size exceeds the CXL range")?;
        check(w.read_percent <= 100, "workload.read_percent must be at most 100")?;
        check(w.max_outstanding > 0, "workload.max_outstanding must be non-zero")?;
        check(w.qos_levels > 0, "workload.qos_levels must be non-zero")?;

        // A request is admitted whole, so its bursts must fit the buffers.
        let bursts = w.size.div_ceil(burst);
        check(
            bursts <= c.read_buffer_size as u64,
            "workload.size needs more bursts than controller.read_buffer_size holds",
        )?;
        check(
            bursts <= c.write_buffer_size as u64,
            "workload.size needs more bursts than controller.write_buffer_size holds",
        )?;
        Ok(())
    }

    /// Host physical range served by the CXL device.
    pub fn cxl_range(&self) -> AddrRange {
        AddrRange::new(self.bridge.cxl_base, self.bridge.cxl_size)
    }
}

impl FromStr for Config {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// Period of the link clock.
    #[serde(default = "d_clock", deserialize_with = "de_latency")]
    pub clock: Tick,

    /// Stop the run at this tick. Zero means no limit.
    #[serde(default, deserialize_with = "de_latency")]
    pub max_ticks: Tick,

    /// Drain the system once the workload has issued every request.
    #[serde(default = "d_true")]
    pub drain: bool,
}

fn d_clock() -> Tick {
    TICKS_PER_NS
}

fn d_true() -> bool {
    true
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            clock: d_clock(),
            max_ticks: 0,
            drain: d_true(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "d_b_lat", deserialize_with = "de_latency")]
    pub bridge_lat: Tick,

    #[serde(default = "d_b_proto", deserialize_with = "de_latency")]
    pub proto_lat: Tick,

    #[serde(default = "d_b_fifo")]
    pub req_fifo_depth: usize,

    #[serde(default = "d_b_fifo")]
    pub resp_fifo_depth: usize,

    #[serde(default = "d_b_base", deserialize_with = "de_addr")]
    pub cxl_base: u64,

    #[serde(default = "d_b_size", deserialize_with = "de_size")]
    pub cxl_size: u64,
}

fn d_b_lat() -> Tick {
    50 * TICKS_PER_NS
}

fn d_b_proto() -> Tick {
    12 * TICKS_PER_NS
}

fn d_b_fifo() -> usize {
    128
}

fn d_b_base() -> u64 {
    0x1_0000_0000
}

fn d_b_size() -> u64 {
    2 << 30
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge_lat: d_b_lat(),
            proto_lat: d_b_proto(),
            req_fifo_depth: d_b_fifo(),
            resp_fifo_depth: d_b_fifo(),
            cxl_base: d_b_base(),
            cxl_size: d_b_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "d_d_proto", deserialize_with = "de_latency")]
    pub proto_lat: Tick,

    #[serde(default = "d_d_fifo")]
    pub req_fifo_depth: usize,

    #[serde(default = "d_d_fifo")]
    pub resp_fifo_depth: usize,

    /// Medium latency charged on the atomic access path.
    #[serde(default = "d_d_medium", deserialize_with = "de_latency")]
    pub medium_access_lat: Tick,
}

fn d_d_proto() -> Tick {
    15 * TICKS_PER_NS
}

fn d_d_fifo() -> usize {
    48
}

fn d_d_medium() -> Tick {
    50 * TICKS_PER_NS
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            proto_lat: d_d_proto(),
            req_fifo_depth: d_d_fifo(),
            resp_fifo_depth: d_d_fifo(),
            medium_access_lat: d_d_medium(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ControllerConfig {
    #[serde(default = "d_c_rd_buf")]
    pub read_buffer_size: usize,

    #[serde(default = "d_c_wr_buf")]
    pub write_buffer_size: usize,

    #[serde(default = "d_c_high")]
    pub write_high_thresh_perc: u32,

    #[serde(default = "d_c_low")]
    pub write_low_thresh_perc: u32,

    #[serde(default = "d_c_min_switch")]
    pub min_reads_per_switch: usize,

    #[serde(default = "d_c_min_switch")]
    pub min_writes_per_switch: usize,

    #[serde(default = "d_c_pipe", deserialize_with = "de_latency")]
    pub frontend_latency: Tick,

    #[serde(default = "d_c_pipe", deserialize_with = "de_latency")]
    pub backend_latency: Tick,

    #[serde(default = "d_c_prio")]
    pub priorities: u8,

    #[serde(default)]
    pub turn_policy: Option<TurnPolicy>,
}

fn d_c_rd_buf() -> usize {
    64
}

fn d_c_wr_buf() -> usize {
    128
}

fn d_c_high() -> u32 {
    85
}

fn d_c_low() -> u32 {
    50
}

fn d_c_min_switch() -> usize {
    16
}

fn d_c_pipe() -> Tick {
    10 * TICKS_PER_NS
}

fn d_c_prio() -> u8 {
    1
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: d_c_rd_buf(),
            write_buffer_size: d_c_wr_buf(),
            write_high_thresh_perc: d_c_high(),
            write_low_thresh_perc: d_c_low(),
            min_reads_per_switch: d_c_min_switch(),
            min_writes_per_switch: d_c_min_switch(),
            frontend_latency: d_c_pipe(),
            backend_latency: d_c_pipe(),
            priorities: d_c_prio(),
            turn_policy: None,
        }
    }
}

impl ControllerConfig {
    /// Scheduler parameters with the write thresholds turned from
    /// percentages of the write buffer into burst counts.
    pub fn scheduler_params(&self) -> SchedulerParams {
        let of_buffer = |perc: u32| self.write_buffer_size * perc as usize / 100;
        SchedulerParams {
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            write_high_threshold: of_buffer(self.write_high_thresh_perc),
            write_low_threshold: of_buffer(self.write_low_thresh_perc),
            min_reads_per_switch: self.min_reads_per_switch,
            min_writes_per_switch: self.min_writes_per_switch,
            frontend_latency: self.frontend_latency,
            backend_latency: self.backend_latency,
            priorities: self.priorities,
            turn_policy: self.turn_policy,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediumKind {
    #[default]
    Dram,
    Nvm,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MediumConfig {
    #[serde(default)]
    pub kind: MediumKind,

    #[serde(default)]
    pub dram: DramConfig,

    #[serde(default)]
    pub nvm: NvmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DramConfig {
    #[serde(default = "d_m_burst", deserialize_with = "de_size")]
    pub burst_size: u64,
    #[serde(default = "d_dram_row", deserialize_with = "de_size")]
    pub row_buffer_size: u64,
    #[serde(default = "d_dram_banks")]
    pub banks: usize,
    #[serde(default = "d_t_burst", deserialize_with = "de_latency")]
    pub t_burst: Tick,
    #[serde(default = "d_dram_t_ck14", deserialize_with = "de_latency")]
    pub t_rcd: Tick,
    #[serde(default = "d_dram_t_ck14", deserialize_with = "de_latency")]
    pub t_cl: Tick,
    #[serde(default = "d_dram_t_ck14", deserialize_with = "de_latency")]
    pub t_rp: Tick,
    #[serde(default = "d_dram_t_ras", deserialize_with = "de_latency")]
    pub t_ras: Tick,
    #[serde(default = "d_dram_t_wr", deserialize_with = "de_latency")]
    pub t_wr: Tick,
    #[serde(default = "d_dram_t_rtp", deserialize_with = "de_latency")]
    pub t_rtp: Tick,
    #[serde(default = "d_dram_t_rfc", deserialize_with = "de_latency")]
    pub t_rfc: Tick,
    #[serde(default = "d_dram_t_refi", deserialize_with = "de_latency")]
    pub t_refi: Tick,
    #[serde(default = "d_dram_t_wtr", deserialize_with = "de_latency")]
    pub t_wtr: Tick,
    #[serde(default = "d_t_rtw", deserialize_with = "de_latency")]
    pub t_rtw: Tick,
}

fn d_m_burst() -> u64 {
    64
}

fn d_dram_row() -> u64 {
    8192
}

fn d_dram_banks() -> usize {
    32
}

fn d_t_burst() -> Tick {
    3_332
}

fn d_dram_t_ck14() -> Tick {
    14_160
}

fn d_dram_t_ras() -> Tick {
    32 * TICKS_PER_NS
}

fn d_dram_t_wr() -> Tick {
    15 * TICKS_PER_NS
}

fn d_dram_t_rtp() -> Tick {
    7_500
}

fn d_dram_t_rfc() -> Tick {
    350 * TICKS_PER_NS
}

fn d_dram_t_refi() -> Tick {
    7_800 * TICKS_PER_NS
}

fn d_dram_t_wtr() -> Tick {
    5 * TICKS_PER_NS
}

fn d_t_rtw() -> Tick {
    1_666
}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            burst_size: d_m_burst(),
            row_buffer_size: d_dram_row(),
            banks: d_dram_banks(),
            t_burst: d_t_burst(),
            t_rcd: d_dram_t_ck14(),
            t_cl: d_dram_t_ck14(),
            t_rp: d_dram_t_ck14(),
            t_ras: d_dram_t_ras(),
            t_wr: d_dram_t_wr(),
            t_rtp: d_dram_t_rtp(),
            t_rfc: d_dram_t_rfc(),
            t_refi: d_dram_t_refi(),
            t_wtr: d_dram_t_wtr(),
            t_rtw: d_t_rtw(),
        }
    }
}

impl DramConfig {
    pub fn timing(&self) -> DramTiming {
        DramTiming {
            burst_size: self.burst_size,
            row_buffer_size: self.row_buffer_size,
            banks: self.banks,
            t_burst: self.t_burst,
            t_rcd: self.t_rcd,
            t_cl: self.t_cl,
            t_rp: self.t_rp,
            t_ras: self.t_ras,
            t_wr: self.t_wr,
            t_rtp: self.t_rtp,
            t_rfc: self.t_rfc,
            t_refi: self.t_refi,
            t_wtr: self.t_wtr,
            t_rtw: self.t_rtw,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NvmConfig {
    #[serde(default = "d_m_burst", deserialize_with = "de_size")]
    pub burst_size: u64,
    #[serde(default = "d_nvm_row", deserialize_with = "de_size")]
    pub row_buffer_size: u64,
    #[serde(default = "d_nvm_banks")]
    pub banks: usize,
    #[serde(default = "d_nvm_pending")]
    pub max_pending_writes: usize,
    #[serde(default = "d_nvm_t_read", deserialize_with = "de_latency")]
    pub t_read: Tick,
    #[serde(default = "d_nvm_t_write", deserialize_with = "de_latency")]
    pub t_write: Tick,
    #[serde(default = "d_nvm_t_send", deserialize_with = "de_latency")]
    pub t_send: Tick,
    #[serde(default = "d_t_burst", deserialize_with = "de_latency")]
    pub t_burst: Tick,
    #[serde(default = "d_t_rtw", deserialize_with = "de_latency")]
    pub t_wtr: Tick,
    #[serde(default = "d_t_rtw", deserialize_with = "de_latency")]
    pub t_rtw: Tick,
}

fn d_nvm_row() -> u64 {
    256
}

fn d_nvm_banks() -> usize {
    16
}

fn d_nvm_pending() -> usize {
    128
}

fn d_nvm_t_read() -> Tick {
    150 * TICKS_PER_NS
}

fn d_nvm_t_write() -> Tick {
    500 * TICKS_PER_NS
}

fn d_nvm_t_send() -> Tick {
    14_160
}

impl Default for NvmConfig {
    fn default() -> Self {
        Self {
            burst_size: d_m_burst(),
            row_buffer_size: d_nvm_row(),
            banks: d_nvm_banks(),
            max_pending_writes: d_nvm_pending(),
            t_read: d_nvm_t_read(),
            t_write: d_nvm_t_write(),
            t_send: d_nvm_t_send(),
            t_burst: d_t_burst(),
            t_wtr: d_t_rtw(),
            t_rtw: d_t_rtw(),
        }
    }
}

impl NvmConfig {
    pub fn timing(&self) -> NvmTiming {
        NvmTiming {
            burst_size: self.burst_size,
            row_buffer_size: self.row_buffer_size,
            banks: self.banks,
            max_pending_writes: self.max_pending_writes,
            t_read: self.t_read,
            t_write: self.t_write,
            t_send: self.t_send,
            t_burst: self.t_burst,
            t_wtr: self.t_wtr,
            t_rtw: self.t_rtw,
        }
    }
}

/// Address sequence of the synthetic workload.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessPattern {
    #[default]
    Linear,
    Random,
}

impl FromStr for AccessPattern {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(AccessPattern::Linear),
            "random" => Ok(AccessPattern::Random),
            other => Err(SimError::Param(format!("unknown access pattern '{other}'"))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkloadConfig {
    #[serde(default = "d_w_requests")]
    pub requests: u64,

    #[serde(default = "d_w_size", deserialize_with = "de_size")]
    pub size: u64,

    /// Clock cycles between two issue attempts.
    #[serde(default = "d_w_interval")]
    pub interval: u64,

    #[serde(default = "d_w_read")]
    pub read_percent: u32,

    #[serde(default)]
    pub pattern: AccessPattern,

    #[serde(default = "d_w_seed")]
    pub seed: u64,

    #[serde(default = "d_w_outstanding")]
    pub max_outstanding: usize,

    /// Requests are spread round-robin over this many QoS priorities.
    #[serde(default = "d_w_qos")]
    pub qos_levels: u8,

    /// Interconnect header delay carried by each request into the bridge.
    #[serde(default, deserialize_with = "de_latency")]
    pub header_delay: Tick,

    /// Interconnect payload delay carried by each request into the bridge.
    #[serde(default, deserialize_with = "de_latency")]
    pub payload_delay: Tick,
}

fn d_w_requests() -> u64 {
    1000
}

fn d_w_size() -> u64 {
    64
}

fn d_w_interval() -> u64 {
    10
}

fn d_w_read() -> u32 {
    70
}

fn d_w_seed() -> u64 {
    1
}

fn d_w_outstanding() -> usize {
    32
}

fn d_w_qos() -> u8 {
    1
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            requests: d_w_requests(),
            size: d_w_size(),
            interval: d_w_interval(),
            read_percent: d_w_read(),
            pattern: AccessPattern::default(),
            seed: d_w_seed(),
            max_outstanding: d_w_outstanding(),
            qos_levels: d_w_qos(),
            header_delay: 0,
            payload_delay: 0,
        }
    }
}

/// Either form a scalar parameter may take in the TOML file.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Int(u64),
    Str(String),
}

/// Splits `"7.8us"` into `("7.8", "us")`.
fn split_unit(s: &str) -> (&str, &str) {
    let s = s.trim();
    let at = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '_'))
        .unwrap_or(s.len());
    (s[..at].trim(), s[at..].trim())
}

fn scaled(num: &str, scale: u64, what: &str, input: &str) -> Result<u64, String> {
    let num = num.replace('_', "");
    if let Ok(n) = num.parse::<u64>() {
        return n
            .checked_mul(scale)
            .ok_or_else(|| format!("{what} '{input}' is out of range"));
    }
    let f: f64 = num
        .parse()
        .map_err(|_| format!("invalid {what} '{input}'"))?;
    let v = (f * scale as f64).round();
    if !v.is_finite() || v < 0.0 || v > u64::MAX as f64 {
        return Err(format!("{what} '{input}' is out of range"));
    }
    Ok(v as u64)
}

/// Parses a latency such as `"50ns"` into ticks. A number without a unit
/// is taken as ticks.
pub fn parse_latency(s: &str) -> Result<Tick, String> {
    let (num, unit) = split_unit(s);
    let scale = match unit {
        "" | "ps" | "t" => 1,
        "ns" => TICKS_PER_NS,
        "us" => TICKS_PER_US,
        "ms" => 1_000 * TICKS_PER_US,
        "s" => 1_000_000 * TICKS_PER_US,
        other => return Err(format!("unknown time unit '{other}' in '{s}'")),
    };
    scaled(num, scale, "latency", s)
}

/// Parses a memory size such as `"2GiB"` into bytes. Decimal prefixes are
/// read as binary ones, so `"2GB"` and `"2GiB"` are the same size.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let (num, unit) = split_unit(s);
    let scale = match unit {
        "" | "B" => 1,
        "KiB" | "kB" | "KB" => 1 << 10,
        "MiB" | "MB" => 1 << 20,
        "GiB" | "GB" => 1 << 30,
        "TiB" | "TB" => 1 << 40,
        other => return Err(format!("unknown size unit '{other}' in '{s}'")),
    };
    scaled(num, scale, "size", s)
}

/// Parses an address, hexadecimal with a `0x` prefix or decimal.
pub fn parse_addr(s: &str) -> Result<u64, String> {
    let s = s.trim().replace('_', "");
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid address '{s}'"))
}

fn de_with<'de, D, F>(d: D, parse: F) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
    F: FnOnce(&str) -> Result<u64, String>,
{
    match RawValue::deserialize(d)? {
        RawValue::Int(v) => Ok(v),
        RawValue::Str(s) => parse(&s).map_err(serde::de::Error::custom),
    }
}

fn de_latency<'de, D: Deserializer<'de>>(d: D) -> Result<Tick, D::Error> {
    de_with(d, parse_latency)
}

fn de_size<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    de_with(d, parse_size)
}

fn de_addr<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    de_with(d, parse_addr)
}
