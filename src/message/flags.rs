use bitflags::bitflags;

bitflags! {
    /// Flags associated with a `Msg` indicating its role or attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MsgFlags: u8 {
        /// More message parts follow this one.
        const MORE = 0b0000_0001;
        /// The part is the peer identity announced at connection start.
        const IDENTITY = 0b0100_0000;
        /// Internal: end-of-stream marker written by a terminating pipe.
        const DELIMITER = 0b1000_0000;
    }
}

bitflags! {
    /// Flags accepted by `Socket::send_with_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SendFlags: u8 {
        /// Return `WouldBlock` instead of waiting for room.
        const DONTWAIT = 0b01;
        /// The message is followed by more parts.
        const MORE = 0b10;
    }
}

bitflags! {
    /// Flags accepted by `Socket::recv_with_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RecvFlags: u8 {
        /// Return `WouldBlock` instead of waiting for a message.
        const DONTWAIT = 0b01;
    }
}
