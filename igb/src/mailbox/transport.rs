//! Mailbox transport.
//!
//! [`MailboxTransport`] is the PF's view of the per-VF mailbox: three
//! event lines (reset, message, ack) and a word buffer. [`PfMailbox`] is the
//! register-backed implementation.
//!
//! # Ownership Handshake
//! ```text
//! write: P2VMAILBOX = PFU; read back PFU ─► VMBMEM[0..n] ─► P2VMAILBOX = STS
//! read:  P2VMAILBOX = PFU; read back PFU ─► VMBMEM[0..n] ─► P2VMAILBOX = ACK
//! ```

use super::{MailboxError, VFMAILBOX_SIZE};
use crate::hw::{regs, Hw, RegisterAccess};

/// Mailbox access for the PF.
pub trait MailboxTransport {
    /// VF raised its reset line; consumes the event.
    fn check_for_rst(&mut self, vf: u32) -> bool;

    /// VF posted a message; consumes the event.
    fn check_for_msg(&mut self, vf: u32) -> bool;

    /// VF acknowledged the last PF message; consumes the event.
    fn check_for_ack(&mut self, vf: u32) -> bool;

    /// Copy the VF's message into `msg`.
    fn read(&mut self, msg: &mut [u32], vf: u32) -> Result<(), MailboxError>;

    /// Send `msg` to the VF.
    fn write(&mut self, msg: &[u32], vf: u32) -> Result<(), MailboxError>;
}

/// Register-backed PF mailbox.
pub struct PfMailbox<'a, R> {
    hw: &'a Hw<R>,
}

impl<'a, R: RegisterAccess> PfMailbox<'a, R> {
    /// Wrap the adapter's registers.
    pub fn new(hw: &'a Hw<R>) -> Self {
        Self { hw }
    }

    /// Test and clear one MBVFICR bit.
    fn check_for_bit(&self, mask: u32) -> bool {
        let mbvficr = self.hw.read(regs::MBVFICR);
        if mbvficr & mask != 0 {
            // Write-1-to-clear.
            self.hw.write(regs::MBVFICR, mask);
            true
        } else {
            false
        }
    }

    fn obtain_lock(&self, vf: u32) -> Result<(), MailboxError> {
        self.hw.write(regs::p2vmailbox(vf), regs::P2VMAILBOX_PFU);
        if self.hw.read(regs::p2vmailbox(vf)) & regs::P2VMAILBOX_PFU != 0 {
            Ok(())
        } else {
            Err(MailboxError::LockFailed)
        }
    }

    fn check_len(len: usize) -> Result<(), MailboxError> {
        if len > VFMAILBOX_SIZE {
            return Err(MailboxError::TooLong { words: len });
        }
        Ok(())
    }
}

impl<R: RegisterAccess> MailboxTransport for PfMailbox<'_, R> {
    fn check_for_rst(&mut self, vf: u32) -> bool {
        let bit = 1 << vf;
        if self.hw.read(regs::VFLRE) & bit != 0 {
            self.hw.write(regs::VFLRE, bit);
            true
        } else {
            false
        }
    }

    fn check_for_msg(&mut self, vf: u32) -> bool {
        self.check_for_bit(regs::MBVFICR_VFREQ_VF1 << vf)
    }

    fn check_for_ack(&mut self, vf: u32) -> bool {
        self.check_for_bit(regs::MBVFICR_VFACK_VF1 << vf)
    }

    fn read(&mut self, msg: &mut [u32], vf: u32) -> Result<(), MailboxError> {
        Self::check_len(msg.len())?;
        self.obtain_lock(vf)?;
        for (i, word) in msg.iter_mut().enumerate() {
            *word = self.hw.read_array(regs::vmbmem(vf), i as u32);
        }
        // Acknowledge and release the buffer.
        self.hw.write(regs::p2vmailbox(vf), regs::P2VMAILBOX_ACK);
        Ok(())
    }

    fn write(&mut self, msg: &[u32], vf: u32) -> Result<(), MailboxError> {
        Self::check_len(msg.len())?;
        self.obtain_lock(vf)?;

        // Stale requests and acks refer to the buffer being overwritten.
        self.check_for_msg(vf);
        self.check_for_ack(vf);

        for (i, word) in msg.iter().enumerate() {
            self.hw.write_array(regs::vmbmem(vf), i as u32, *word);
        }
        self.hw.write(regs::p2vmailbox(vf), regs::P2VMAILBOX_STS);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::Generation;
    use crate::testutil::MockRegisters;

    fn hw() -> Hw<MockRegisters> {
        let regs_mock = MockRegisters::new();
        regs_mock.w1c(regs::VFLRE);
        regs_mock.w1c(regs::MBVFICR);
        Hw::new(regs_mock, Generation::I82576)
    }

    #[test]
    fn test_reset_line_is_consumed() {
        let hw = hw();
        hw.regs().poke(regs::VFLRE, 0b100);
        let mut mbx = PfMailbox::new(&hw);
        assert!(!mbx.check_for_rst(1));
        assert!(mbx.check_for_rst(2));
        assert!(!mbx.check_for_rst(2));
    }

    #[test]
    fn test_request_and_ack_bits() {
        let hw = hw();
        hw.regs().poke(regs::MBVFICR, (regs::MBVFICR_VFREQ_VF1 << 3) | (regs::MBVFICR_VFACK_VF1 << 1));
        let mut mbx = PfMailbox::new(&hw);
        assert!(mbx.check_for_msg(3));
        assert!(!mbx.check_for_msg(3));
        assert!(!mbx.check_for_ack(3));
        assert!(mbx.check_for_ack(1));
        assert_eq!(hw.read(regs::MBVFICR), 0);
    }

    #[test]
    fn test_write_fills_memory_then_signals() {
        let hw = hw();
        let mut mbx = PfMailbox::new(&hw);
        mbx.write(&[0xAA, 0xBB], 2).unwrap();
        assert_eq!(hw.read_array(regs::vmbmem(2), 0), 0xAA);
        assert_eq!(hw.read_array(regs::vmbmem(2), 1), 0xBB);
        assert_eq!(
            hw.regs().writes_to(regs::p2vmailbox(2)),
            [regs::P2VMAILBOX_PFU, regs::P2VMAILBOX_STS]
        );
    }

    #[test]
    fn test_read_acks_after_copy() {
        let hw = hw();
        hw.write_array(regs::vmbmem(0), 0, 0x1234);
        let mut mbx = PfMailbox::new(&hw);
        let mut msg = [0u32; 4];
        mbx.read(&mut msg, 0).unwrap();
        assert_eq!(msg[0], 0x1234);
        assert_eq!(hw.read(regs::p2vmailbox(0)), regs::P2VMAILBOX_ACK);
    }

    #[test]
    fn test_lock_failure() {
        let regs_mock = MockRegisters::new();
        regs_mock.hold(regs::p2vmailbox(0), 0);
        let hw = Hw::new(regs_mock, Generation::I82576);
        let mut mbx = PfMailbox::new(&hw);
        assert_eq!(mbx.write(&[1], 0), Err(MailboxError::LockFailed));
    }

    #[test]
    fn test_oversize_message_rejected() {
        let hw = hw();
        let mut mbx = PfMailbox::new(&hw);
        assert_eq!(
            mbx.write(&[0; VFMAILBOX_SIZE + 1], 0),
            Err(MailboxError::TooLong { words: VFMAILBOX_SIZE + 1 })
        );
    }
}
