//! Slave device register address map.
//!
//! Defined in ETG1000.4, Table 31.

/// A named slave register address.
///
/// This enum makes it easier to work with raw EtherCAT addresses by giving them nice names
/// instead of requiring every caller to remember magic offsets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum RegisterAddress {
    /// Slave type, `u8`.
    Type = 0x0000,
    /// EtherCAT revision.
    Revision = 0x0001,
    /// Slave build.
    Build = 0x0002,
    /// Number of supported FMMU entities.
    FmmuCount = 0x0004,
    /// Number of supported sync manager channels.
    SyncManagerChannels = 0x0005,
    /// RAM size in kibibytes.
    RamSize = 0x0006,
    /// EtherCAT port descriptors 0-3, `u8`.
    PortDescriptors = 0x0007,
    /// Feature support flags, `u16`.
    SupportFlags = 0x0008,
    /// The slave's configured station address, `u16`.
    ConfiguredStationAddress = 0x0010,
    /// The slave's configured station alias, `u16`.
    ConfiguredStationAlias = 0x0012,

    /// DL status, `u16`. ETG1000.4 Table 34.
    DlStatus = 0x0110,

    /// Application Layer (AL) control register, `u16`. ETG1000.4 Table 35.
    AlControl = 0x0120,
    /// Application Layer (AL) status register, `u16`.
    AlStatus = 0x0130,
    /// Application Layer (AL) status code register, `u16`.
    AlStatusCode = 0x0134,

    /// Watchdog divider, `u16`. ETG1000.4 section 6.3.
    WatchdogDivider = 0x0400,
    /// PDI watchdog timeout, `u16`.
    PdiWatchdog = 0x0410,
    /// Sync manager watchdog timeout, `u16`.
    SyncManagerWatchdog = 0x0420,
    /// Sync manager watchdog status, `u16`.
    SyncManagerWatchdogStatus = 0x0440,
    /// Sync manager watchdog counter, `u8`.
    SyncManagerWatchdogCounter = 0x0442,
    /// PDI watchdog counter, `u8`.
    PdiWatchdogCounter = 0x0443,

    /// EEPROM (SII) config register, `u16`.
    SiiConfig = 0x0500,
    /// EEPROM (SII) control register, `u16`.
    SiiControl = 0x0502,
    /// EEPROM (SII) address register, `u32`.
    SiiAddress = 0x0504,
    /// Start of the 4-byte (read) / 2-byte (write) SII data window.
    SiiData = 0x0508,

    /// Fieldbus Memory Management Unit (FMMU) 0. ETG1000.4 Table 57.
    Fmmu0 = 0x0600,

    /// Sync Manager (SM) 0. ETG1000.4 Table 59.
    Sm0 = 0x0800,

    /// DC receive time, port 0, `u32`. ETG1000.4 Table 60. Distributed Clocks synchronisation is
    /// out of scope; these constants are kept for completeness of the register map and are never
    /// read or written by this crate.
    DcTimePort0 = 0x0900,
    /// DC receive time, port 1, `u32`.
    DcTimePort1 = 0x0904,
    /// DC receive time, port 2, `u32`.
    DcTimePort2 = 0x0908,
    /// DC receive time, port 3, `u32`.
    DcTimePort3 = 0x090c,
    /// DC system time, `u64`.
    DcSystemTime = 0x0910,
    /// DC system receive time, `u64`.
    DcReceiveTime = 0x0918,
    /// DC system time offset, `u64`.
    DcSystemTimeOffset = 0x0920,
    /// DC system time difference, `u32`.
    DcSystemTimeDifference = 0x092c,
    /// DC system time transmission delay, `u32`.
    DcSystemTimeTransmissionDelay = 0x0928,
    /// DC control loop parameter 1, `u16`.
    DcControlLoopParam1 = 0x0930,
    /// DC control loop parameter 2, `u16`.
    DcControlLoopParam2 = 0x0932,
    /// DC control loop parameter 3, `u16`.
    DcControlLoopParam3 = 0x0934,
    /// DC sync active flags. ETG1000.4 Table 61, DC user P1.
    DcSyncActive = 0x0981,
    /// DC sync0 cycle start time. Table 61, DC user P4.
    DcSyncStartTime = 0x0990,
    /// DC sync0 cycle time. Table 61, DC user P5.
    DcSync0CycleTime = 0x09a0,
}

impl From<RegisterAddress> for u16 {
    fn from(reg: RegisterAddress) -> Self {
        reg as u16
    }
}

impl RegisterAddress {
    /// Address of FMMU entity `index`. Each FMMU occupies 16 bytes.
    pub fn fmmu(index: u8) -> u16 {
        Self::Fmmu0 as u16 + u16::from(index) * 0x10
    }

    /// Address of sync manager channel `index`. Each channel occupies 8 bytes.
    pub fn sync_manager(index: u8) -> u16 {
        Self::Sm0 as u16 + u16::from(index) * 0x08
    }
}
