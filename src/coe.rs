//! CANopen over EtherCAT (CoE) framing: the header atop every mailbox payload whose
//! [`crate::mailbox::MailboxType`] is `Coe`, plus SDO upload/download and the abort code table.
//!
//! Defined in ETG1000.6 5.6.1 onward.

use crate::error::{Error, MailboxError};
use crate::mailbox::{MailboxHeader, MailboxType, Priority};

/// The 2-byte CoE header: a 9-bit reserved "number" field and a 4-bit service selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoeHeader {
    /// Reserved/number field, low 9 bits.
    pub number: u16,
    /// Which CoE service this message carries.
    pub service: CoeService,
}

impl CoeHeader {
    /// Packed length, in bytes.
    pub const PACKED_LEN: usize = 2;

    /// Decode from the 2-byte wire form.
    pub fn unpack(raw: &[u8; Self::PACKED_LEN]) -> Option<Self> {
        let value = u16::from_le_bytes(*raw);
        let number = value & 0x01ff;
        let service = CoeService::from_raw((value >> 12) as u8)?;

        Some(Self { number, service })
    }

    /// Encode into the 2-byte wire form.
    pub fn pack(&self) -> [u8; Self::PACKED_LEN] {
        let value = (self.number & 0x01ff) | ((self.service as u16) << 12);
        value.to_le_bytes()
    }
}

/// CoE service type, ETG1000.6 Table 29.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CoeService {
    Emergency = 0x01,
    SdoRequest = 0x02,
    SdoResponse = 0x03,
    TxPdo = 0x04,
    RxPdo = 0x05,
    TxPdoRemoteRequest = 0x06,
    RxPdoRemoteRequest = 0x07,
    SdoInformation = 0x08,
}

impl CoeService {
    fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Emergency),
            0x02 => Some(Self::SdoRequest),
            0x03 => Some(Self::SdoResponse),
            0x04 => Some(Self::TxPdo),
            0x05 => Some(Self::RxPdo),
            0x06 => Some(Self::TxPdoRemoteRequest),
            0x07 => Some(Self::RxPdoRemoteRequest),
            0x08 => Some(Self::SdoInformation),
            _ => None,
        }
    }
}

/// Flags byte at the front of an initiate SDO request/response, ETG1000.6 5.6.2.1.1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct InitSdoFlags {
    /// Whether `size` carries a meaningful byte count.
    pub size_indicator: bool,
    /// Whether the transfer is expedited (data fits in the remaining 4 bytes of this frame).
    pub expedited_transfer: bool,
    /// For expedited transfers, `4 - size` is the number of valid data bytes.
    pub size: u8,
    /// Whether this is a complete-access (whole object) transfer.
    pub complete_access: bool,
    /// The client/server command specifier.
    pub command: u8,
}

impl InitSdoFlags {
    fn from_byte(byte: u8) -> Self {
        Self {
            size_indicator: byte & 0x01 != 0,
            expedited_transfer: byte & 0x02 != 0,
            size: (byte >> 2) & 0x03,
            complete_access: byte & 0x10 != 0,
            command: (byte >> 5) & 0x07,
        }
    }

    fn to_byte(self) -> u8 {
        let mut byte = 0u8;
        if self.size_indicator {
            byte |= 0x01;
        }
        if self.expedited_transfer {
            byte |= 0x02;
        }
        byte |= (self.size & 0x03) << 2;
        if self.complete_access {
            byte |= 0x10;
        }
        byte |= (self.command & 0x07) << 5;
        byte
    }
}

/// SDO download/upload client command specifiers (the `command` sub-field of [`InitSdoFlags`]).
pub mod command_specifier {
    pub const DOWNLOAD_SEGMENT_REQUEST: u8 = 0;
    pub const DOWNLOAD_REQUEST: u8 = 1;
    pub const UPLOAD_REQUEST: u8 = 2;
    pub const UPLOAD_SEGMENT_REQUEST: u8 = 3;
    pub const ABORT_TRANSFER_REQUEST: u8 = 4;
}

/// The 8-byte "initiate" SDO header: flags, object index/sub-index, and up to 4 bytes of
/// expedited data (or a 4-byte total-size field for segmented transfers).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InitSdoHeader {
    pub flags: InitSdoFlags,
    pub index: u16,
    pub sub_index: u8,
    pub data: [u8; 4],
}

impl InitSdoHeader {
    /// Packed length, in bytes (not including the preceding [`MailboxHeader`]/[`CoeHeader`]).
    pub const PACKED_LEN: usize = 8;

    pub fn pack(&self) -> [u8; Self::PACKED_LEN] {
        let mut buf = [0u8; Self::PACKED_LEN];
        buf[0] = self.flags.to_byte();
        buf[1..3].copy_from_slice(&self.index.to_le_bytes());
        buf[3] = self.sub_index;
        buf[4..8].copy_from_slice(&self.data);
        buf
    }

    pub fn unpack(raw: &[u8; Self::PACKED_LEN]) -> Self {
        Self {
            flags: InitSdoFlags::from_byte(raw[0]),
            index: u16::from_le_bytes([raw[1], raw[2]]),
            sub_index: raw[3],
            data: [raw[4], raw[5], raw[6], raw[7]],
        }
    }
}

/// Continuation frame for an upload/download longer than the 4 bytes an expedited transfer
/// carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentSdoHeader {
    /// Toggles with every segment, starting at 0.
    pub toggle: bool,
    /// Number of valid bytes in the final segment's data area minus 1, or the continuation
    /// indicator for non-final segments.
    pub seg_data_size: u8,
    /// Whether this is the last segment.
    pub last_segment: bool,
}

impl SegmentSdoHeader {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            last_segment: byte & 0x01 != 0,
            seg_data_size: (byte >> 1) & 0x07,
            toggle: byte & 0x10 != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = (self.seg_data_size & 0x07) << 1;
        if self.toggle {
            byte |= 0x10;
        }
        if self.last_segment {
            byte |= 0x01;
        }
        byte
    }
}

/// SDO abort codes, ETG1000.6 Table 41.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CoeAbortCode {
    ToggleBit,
    SdoTimeout,
    InvalidCommand,
    OutOfMemory,
    UnsupportedAccess,
    WriteOnlyRead,
    ReadOnlyWrite,
    IndexOnly,
    NoCompleteAccess,
    ObjectTooLarge,
    DownloadBlocked,
    NotFound,
    PdoMappingFailed,
    PdoTooSmall,
    Incompatible,
    Internal,
    HardwareFailure,
    DataLengthMismatch,
    DataTooLong,
    DataTooShort,
    SubIndexNotFound,
    ValueOutOfRange,
    ValueTooLarge,
    ValueTooSmall,
    MaxMin,
    General,
    TransferFailed,
    TransferFailedLocal,
    InvalidState,
    NoObjectDictionary,
    /// A value not in the table above.
    Unknown(u32),
}

impl From<u32> for CoeAbortCode {
    fn from(value: u32) -> Self {
        match value {
            0x0503_0000 => Self::ToggleBit,
            0x0504_0000 => Self::SdoTimeout,
            0x0504_0001 => Self::InvalidCommand,
            0x0504_0005 => Self::OutOfMemory,
            0x0601_0000 => Self::UnsupportedAccess,
            0x0601_0001 => Self::WriteOnlyRead,
            0x0601_0002 => Self::ReadOnlyWrite,
            0x0601_0003 => Self::IndexOnly,
            0x0601_0004 => Self::NoCompleteAccess,
            0x0601_0005 => Self::ObjectTooLarge,
            0x0601_0006 => Self::DownloadBlocked,
            0x0602_0000 => Self::NotFound,
            0x0604_0041 => Self::PdoMappingFailed,
            0x0604_0042 => Self::PdoTooSmall,
            0x0604_0043 => Self::Incompatible,
            0x0604_0047 => Self::Internal,
            0x0606_0000 => Self::HardwareFailure,
            0x0607_0010 => Self::DataLengthMismatch,
            0x0607_0012 => Self::DataTooLong,
            0x0607_0013 => Self::DataTooShort,
            0x0609_0011 => Self::SubIndexNotFound,
            0x0609_0030 => Self::ValueOutOfRange,
            0x0609_0031 => Self::ValueTooLarge,
            0x0609_0032 => Self::ValueTooSmall,
            0x0609_0036 => Self::MaxMin,
            0x0800_0000 => Self::General,
            0x0800_0020 => Self::TransferFailed,
            0x0800_0021 => Self::TransferFailedLocal,
            0x0800_0022 => Self::InvalidState,
            0x0800_0023 => Self::NoObjectDictionary,
            other => Self::Unknown(other),
        }
    }
}

impl core::fmt::Display for CoeAbortCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::ToggleBit => "toggle bit not changed",
            Self::SdoTimeout => "SDO protocol timeout",
            Self::InvalidCommand => "client/server command specifier not valid or unknown",
            Self::OutOfMemory => "out of memory",
            Self::UnsupportedAccess => "unsupported access to an object",
            Self::WriteOnlyRead => "attempt to read a write-only object",
            Self::ReadOnlyWrite => "attempt to write a read-only object",
            Self::IndexOnly => "sub-index cannot be written, SI0 must be 0",
            Self::NoCompleteAccess => "complete access not supported for this object",
            Self::ObjectTooLarge => "object length exceeds mailbox size",
            Self::DownloadBlocked => "object mapped to RxPDO, download blocked",
            Self::NotFound => "object does not exist in the object directory",
            Self::PdoMappingFailed => "object cannot be mapped into the PDO",
            Self::PdoTooSmall => "mapped objects would exceed PDO length",
            Self::Incompatible => "general parameter incompatibility",
            Self::Internal => "general internal incompatibility in the device",
            Self::HardwareFailure => "access failed due to a hardware error",
            Self::DataLengthMismatch => "data type/length of service parameter does not match",
            Self::DataTooLong => "data type/length of service parameter too high",
            Self::DataTooShort => "data type/length of service parameter too low",
            Self::SubIndexNotFound => "sub-index does not exist",
            Self::ValueOutOfRange => "value range of parameter exceeded",
            Self::ValueTooLarge => "value of parameter written too high",
            Self::ValueTooSmall => "value of parameter written too low",
            Self::MaxMin => "maximum value is less than minimum value",
            Self::General => "general error",
            Self::TransferFailed => "data cannot be transferred or stored to the application",
            Self::TransferFailedLocal => "transfer failed due to local control",
            Self::InvalidState => "transfer failed due to the present device state",
            Self::NoObjectDictionary => "object dictionary generation failed or absent",
            Self::Unknown(_) => "unknown abort code",
        })
    }
}

/// Build an expedited SDO download request payload (mailbox header + CoE header + init header),
/// for data of up to 4 bytes. Longer payloads are a non-goal here (see DESIGN.md — segmented
/// downloads are mentioned but the facade only exercises expedited transfers).
pub fn expedited_download_request(index: u16, sub_index: u8, data: &[u8]) -> Result<InitSdoHeader, Error> {
    if data.len() > 4 {
        return Err(Error::InitCommandValueTooLong { len: data.len() });
    }

    let mut buf = [0u8; 4];
    buf[..data.len()].copy_from_slice(data);

    Ok(InitSdoHeader {
        flags: InitSdoFlags {
            size_indicator: true,
            expedited_transfer: true,
            size: (4 - data.len()) as u8,
            complete_access: false,
            command: command_specifier::DOWNLOAD_REQUEST,
        },
        index,
        sub_index,
        data: buf,
    })
}

/// Compose a full mailbox frame (6-byte [`MailboxHeader`] + 2-byte [`CoeHeader`] + 8-byte
/// [`InitSdoHeader`]) for an expedited SDO download, ready to be written to a slave's
/// mailbox-out Sync Manager.
pub fn build_download_frame(address: u16, counter: u8, index: u16, sub_index: u8, data: &[u8]) -> Result<Vec<u8>, Error> {
    let init_header = expedited_download_request(index, sub_index, data)?;
    build_frame(address, counter, &init_header)
}

/// Build an SDO upload (read) request header for `index`:`sub_index`. Carries no payload; the
/// response's [`InitSdoHeader::data`] holds the value once the slave answers.
pub fn upload_request(index: u16, sub_index: u8) -> InitSdoHeader {
    InitSdoHeader {
        flags: InitSdoFlags {
            command: command_specifier::UPLOAD_REQUEST,
            ..Default::default()
        },
        index,
        sub_index,
        data: [0u8; 4],
    }
}

/// Compose a full mailbox frame for an SDO upload (read) request, ready to be written to a
/// slave's mailbox-out Sync Manager.
pub fn build_upload_frame(address: u16, counter: u8, index: u16, sub_index: u8) -> Vec<u8> {
    build_frame(address, counter, &upload_request(index, sub_index))
        .expect("upload requests carry no payload and cannot exceed the value field")
}

fn build_frame(address: u16, counter: u8, init_header: &InitSdoHeader) -> Result<Vec<u8>, Error> {
    let coe_header = CoeHeader {
        number: 0,
        service: CoeService::SdoRequest,
    };

    let mailbox_header = MailboxHeader {
        length: (CoeHeader::PACKED_LEN + InitSdoHeader::PACKED_LEN) as u16,
        address,
        priority: Priority::Lowest,
        mailbox_type: MailboxType::Coe,
        counter,
    };

    let mut frame = Vec::with_capacity(MailboxHeader::PACKED_LEN + CoeHeader::PACKED_LEN + InitSdoHeader::PACKED_LEN);
    frame.extend_from_slice(&mailbox_header.pack());
    frame.extend_from_slice(&coe_header.pack());
    frame.extend_from_slice(&init_header.pack());

    Ok(frame)
}

/// Parse a full mailbox response frame (as read back from a slave's mailbox-in Sync Manager)
/// into the expedited SDO payload bytes, or an abort error.
///
/// Returns `Err(Error::Mailbox(MailboxError::InvalidResponse))` if the frame is too short or its
/// mailbox/CoE headers do not parse.
pub fn parse_response_frame(raw: &[u8], index: u16, sub_index: u8) -> Result<Vec<u8>, Error> {
    const HEADER_LEN: usize = MailboxHeader::PACKED_LEN + CoeHeader::PACKED_LEN + InitSdoHeader::PACKED_LEN;

    if raw.len() < HEADER_LEN {
        return Err(Error::Mailbox(MailboxError::InvalidResponse));
    }

    let mailbox_header_bytes: [u8; MailboxHeader::PACKED_LEN] = raw[0..MailboxHeader::PACKED_LEN].try_into().unwrap();
    let _mailbox_header = MailboxHeader::unpack(&mailbox_header_bytes).ok_or(Error::Mailbox(MailboxError::InvalidResponse))?;

    let coe_start = MailboxHeader::PACKED_LEN;
    let coe_header_bytes: [u8; CoeHeader::PACKED_LEN] = raw[coe_start..coe_start + CoeHeader::PACKED_LEN].try_into().unwrap();
    let coe_header = CoeHeader::unpack(&coe_header_bytes).ok_or(Error::Mailbox(MailboxError::InvalidResponse))?;

    if coe_header.service != CoeService::SdoResponse {
        return Err(Error::Mailbox(MailboxError::InvalidResponse));
    }

    let init_start = coe_start + CoeHeader::PACKED_LEN;
    let init_header_bytes: [u8; InitSdoHeader::PACKED_LEN] = raw[init_start..init_start + InitSdoHeader::PACKED_LEN].try_into().unwrap();
    let init_header = InitSdoHeader::unpack(&init_header_bytes);

    parse_sdo_response(init_header, index, sub_index)
}

/// Parse an SDO response, yielding either the expedited payload bytes or an abort error.
pub fn parse_sdo_response(
    header: InitSdoHeader,
    index: u16,
    sub_index: u8,
) -> Result<Vec<u8>, Error> {
    if header.flags.command == command_specifier::ABORT_TRANSFER_REQUEST {
        let code = CoeAbortCode::from(u32::from_le_bytes(header.data));

        return Err(Error::Mailbox(MailboxError::Aborted {
            code,
            index,
            sub_index,
        }));
    }

    if header.index != index || header.sub_index != sub_index {
        return Err(Error::Mailbox(MailboxError::InvalidResponse));
    }

    let valid_len = if header.flags.expedited_transfer {
        (4 - header.flags.size) as usize
    } else {
        4
    };

    Ok(header.data[..valid_len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coe_header_round_trips() {
        let header = CoeHeader {
            number: 0,
            service: CoeService::SdoRequest,
        };

        assert_eq!(CoeHeader::unpack(&header.pack()).unwrap(), header);
    }

    #[test]
    fn expedited_download_rejects_oversized_payload() {
        assert!(matches!(
            expedited_download_request(0x1234, 0, &[0u8; 5]),
            Err(Error::InitCommandValueTooLong { len: 5 })
        ));
    }

    #[test]
    fn abort_response_surfaces_abort_code() {
        let header = InitSdoHeader {
            flags: InitSdoFlags {
                command: command_specifier::ABORT_TRANSFER_REQUEST,
                ..Default::default()
            },
            index: 0x1018,
            sub_index: 1,
            data: 0x0602_0000u32.to_le_bytes(),
        };

        let result = parse_sdo_response(header, 0x1018, 1);

        assert!(matches!(
            result,
            Err(Error::Mailbox(MailboxError::Aborted {
                code: CoeAbortCode::NotFound,
                ..
            }))
        ));
    }

    #[test]
    fn expedited_round_trip_recovers_payload() {
        let request = expedited_download_request(0x6040, 0, &[0x06, 0x00]).unwrap();
        let recovered = parse_sdo_response(request, 0x6040, 0).unwrap();
        assert_eq!(recovered, vec![0x06, 0x00]);
    }
}
