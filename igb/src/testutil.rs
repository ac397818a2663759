//! Test doubles for registers, DMA and the VF mailbox.

use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use crate::dma::{ConsistentRegion, DmaDirection, DmaError, DmaHandle, DmaMapper, IdentityDma};
use crate::hw::RegisterAccess;
use crate::mailbox::transport::MailboxTransport;
use crate::mailbox::MailboxError;

// ═══════════════════════════════════════════════════════════════════════════
// REGISTERS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct RegisterFile {
    values: BTreeMap<u32, u32>,
    /// Bits that always read back as set.
    sticky: BTreeMap<u32, u32>,
    /// Registers that always read back a fixed value.
    held: BTreeMap<u32, u32>,
    /// Write-1-to-clear registers.
    w1c: BTreeSet<u32>,
    log: Vec<(u32, u32)>,
}

/// Register file backed by a map. Unwritten registers read as zero.
#[derive(Default)]
pub struct MockRegisters {
    inner: Mutex<RegisterFile>,
}

impl MockRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bits in `mask` read back as set regardless of writes.
    pub fn stick(&self, reg: u32, mask: u32) {
        *self.inner.lock().sticky.entry(reg).or_insert(0) |= mask;
    }

    /// Reads of `reg` always return `value`.
    pub fn hold(&self, reg: u32, value: u32) {
        self.inner.lock().held.insert(reg, value);
    }

    /// Set a register as the hardware would, without logging a write.
    pub fn poke(&self, reg: u32, value: u32) {
        self.inner.lock().values.insert(reg, value);
    }

    /// Writes to `reg` clear the written bits.
    pub fn w1c(&self, reg: u32) {
        self.inner.lock().w1c.insert(reg);
    }

    /// Every value written to `reg`, oldest first.
    pub fn writes_to(&self, reg: u32) -> Vec<u32> {
        self.inner
            .lock()
            .log
            .iter()
            .filter(|(r, _)| *r == reg)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn clear_log(&self) {
        self.inner.lock().log.clear();
    }
}

impl RegisterAccess for MockRegisters {
    fn read32(&self, reg: u32) -> u32 {
        let file = self.inner.lock();
        if let Some(v) = file.held.get(&reg) {
            return *v;
        }
        file.values.get(&reg).copied().unwrap_or(0) | file.sticky.get(&reg).copied().unwrap_or(0)
    }

    fn write32(&self, reg: u32, value: u32) {
        let mut file = self.inner.lock();
        file.log.push((reg, value));
        if file.w1c.contains(&reg) {
            let cur = file.values.entry(reg).or_insert(0);
            *cur &= !value;
        } else {
            file.values.insert(reg, value);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DMA
// ═══════════════════════════════════════════════════════════════════════════

/// Identity DMA that counts outstanding mappings and injects failures.
#[derive(Default)]
pub struct FaultyDma {
    fail_consistent: bool,
    /// 1-based index of the streaming map call that fails.
    fail_map_at: Option<usize>,
    map_calls: AtomicUsize,
    mapped: AtomicUsize,
    consistent: AtomicUsize,
}

impl FaultyDma {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_consistent() -> Self {
        Self {
            fail_consistent: true,
            ..Self::default()
        }
    }

    pub fn failing_map(nth: usize) -> Self {
        Self {
            fail_map_at: Some(nth),
            ..Self::default()
        }
    }

    pub fn mapped_outstanding(&self) -> usize {
        self.mapped.load(Ordering::Relaxed)
    }

    pub fn consistent_outstanding(&self) -> usize {
        self.consistent.load(Ordering::Relaxed)
    }
}

impl DmaMapper for FaultyDma {
    fn map(&self, buf: &[u8], direction: DmaDirection) -> Result<DmaHandle, DmaError> {
        let call = self.map_calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_map_at == Some(call) {
            return Err(DmaError::MappingFailed);
        }
        let handle = IdentityDma::new().map(buf, direction)?;
        self.mapped.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    fn unmap(&self, _handle: DmaHandle) {
        self.mapped.fetch_sub(1, Ordering::Relaxed);
    }

    fn alloc_consistent(&self, size: usize) -> Result<ConsistentRegion, DmaError> {
        if self.fail_consistent {
            return Err(DmaError::OutOfMemory);
        }
        let region = IdentityDma::new().alloc_consistent(size)?;
        self.consistent.fetch_add(1, Ordering::Relaxed);
        Ok(region)
    }

    fn free_consistent(&self, region: ConsistentRegion) {
        self.consistent.fetch_sub(1, Ordering::Relaxed);
        IdentityDma::new().free_consistent(region)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MAILBOX
// ═══════════════════════════════════════════════════════════════════════════

/// Scripted VF side of the mailbox. Records every PF reply.
#[derive(Default)]
pub struct RecordingMailbox {
    resets: BTreeSet<u32>,
    acks: BTreeSet<u32>,
    inbox: BTreeMap<u32, VecDeque<Vec<u32>>>,
    sent: Vec<(u32, Vec<u32>)>,
}

impl RecordingMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_msg(&mut self, vf: u32, msg: &[u32]) {
        self.inbox.entry(vf).or_default().push_back(msg.to_vec());
    }

    pub fn request_reset(&mut self, vf: u32) {
        self.resets.insert(vf);
    }

    pub fn push_ack(&mut self, vf: u32) {
        self.acks.insert(vf);
    }

    pub fn sent_to(&self, vf: u32) -> Vec<Vec<u32>> {
        self.sent
            .iter()
            .filter(|(to, _)| *to == vf)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn take_sent(&mut self) -> Vec<(u32, Vec<u32>)> {
        core::mem::take(&mut self.sent)
    }
}

impl MailboxTransport for RecordingMailbox {
    fn check_for_rst(&mut self, vf: u32) -> bool {
        self.resets.remove(&vf)
    }

    fn check_for_msg(&mut self, vf: u32) -> bool {
        self.inbox.get(&vf).map_or(false, |q| !q.is_empty())
    }

    fn check_for_ack(&mut self, vf: u32) -> bool {
        self.acks.remove(&vf)
    }

    fn read(&mut self, msg: &mut [u32], vf: u32) -> Result<(), MailboxError> {
        let next = self
            .inbox
            .get_mut(&vf)
            .and_then(VecDeque::pop_front)
            .ok_or(MailboxError::LockFailed)?;
        if next.len() > msg.len() {
            return Err(MailboxError::TooLong { words: next.len() });
        }
        msg.fill(0);
        msg[..next.len()].copy_from_slice(&next);
        Ok(())
    }

    fn write(&mut self, msg: &[u32], vf: u32) -> Result<(), MailboxError> {
        self.sent.push((vf, msg.to_vec()));
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CLOCK
// ═══════════════════════════════════════════════════════════════════════════

/// Clock that advances by `step` on every read.
pub struct StepClock {
    now: AtomicU64,
    step: u64,
}

impl StepClock {
    pub fn new(start: u64, step: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
            step,
        }
    }

    /// Jump forward without a read.
    pub fn advance(&self, ticks: u64) {
        self.now.fetch_add(ticks, Ordering::Relaxed);
    }
}

impl crate::time::Clock for StepClock {
    fn ticks(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::Relaxed)
    }
}
