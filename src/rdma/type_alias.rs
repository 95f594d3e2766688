//! Type aliases for RDMA identifiers carried across the transport.

/// [`u8`]: **Port number**, identifies a port on an HCA.
pub type PortNum = u8;

/// [`u16`]: **Local identifier (LID)**, identifies a port on a switch or an HCA in the subnet.
pub type Lid = u16;

/// [`u8`]: **Global identifier (GID) index**, identifies a GID in a port's GID table.
pub type GidIndex = u8;

/// [`u32`]: **Queue pair number**, identifies a queue pair on its device.
pub type Qpn = u32;

/// [`u32`]: **Packet sequence number (PSN)**, identifies a packet in a flow.
pub type Psn = u32;

/// [`u32`]: **Local key**, identifies a local memory region.
pub type LKey = u32;

/// [`u32`]: **Remote key**, grants a peer access to a memory region.
pub type RKey = u32;

/// [`u64`]: **Work request identifier**, designated by the poster to identify a work request.
pub type WrId = u64;
