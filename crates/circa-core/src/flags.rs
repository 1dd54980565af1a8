//! Bit masks carried on the wire: subscription event masks and per-channel
//! access rights.

use bitflags::bitflags;

bitflags! {
    /// Event mask for a subscription: which kinds of updates the server
    /// should push.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EventMask: u16 {
        /// Value changes beyond the monitor deadband.
        const VALUE = 0x01;
        /// Value changes beyond the archival deadband.
        const LOG = 0x02;
        /// Alarm state changes.
        const ALARM = 0x04;
        /// Property/metadata changes.
        const PROPERTY = 0x08;
    }
}

bitflags! {
    /// Access rights granted by the server for one channel.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AccessRights: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
    }
}

impl EventMask {
    /// Decode from the wire, ignoring reserved bits.
    pub fn from_wire(raw: u16) -> Self {
        Self::from_bits_truncate(raw)
    }
}

impl AccessRights {
    /// Decode from the wire, ignoring reserved bits.
    pub fn from_wire(raw: u32) -> Self {
        Self::from_bits_truncate(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_mask_wire_values() {
        assert_eq!(EventMask::VALUE.bits(), 0x01);
        assert_eq!(EventMask::LOG.bits(), 0x02);
        assert_eq!(EventMask::ALARM.bits(), 0x04);
        assert_eq!(EventMask::PROPERTY.bits(), 0x08);
    }

    #[test]
    fn event_mask_ignores_reserved_bits() {
        let mask = EventMask::from_wire(0xFF01);
        assert_eq!(mask, EventMask::VALUE);
    }

    #[test]
    fn access_rights_combinations() {
        let rw = AccessRights::READ | AccessRights::WRITE;
        assert_eq!(rw.bits(), 0x03);
        assert!(rw.contains(AccessRights::READ));
        assert_eq!(AccessRights::from_wire(0x02), AccessRights::WRITE);
    }
}
