//! DNS message parse/build

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::buffer::ByteBuffer;
use crate::dns::name::{read_name, write_name};
use crate::dns::DnsError;

pub const CLASS_IN: u16 = 0x0001;

const HEADER_LEN: usize = 12;

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;

/// Record types the tunnel consumes. Anything else is carried opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Ns,
    Cname,
    Mx,
    Txt,
    Aaaa,
    Other(u16),
}

impl RecordType {
    pub fn to_u16(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ns => 2,
            RecordType::Cname => 5,
            RecordType::Mx => 15,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
            RecordType::Other(v) => v,
        }
    }

    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::Ns,
            5 => RecordType::Cname,
            15 => RecordType::Mx,
            16 => RecordType::Txt,
            28 => RecordType::Aaaa,
            other => RecordType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Query,
    InverseQuery,
    Status,
    Other(u8),
}

impl Opcode {
    fn to_u16(self) -> u16 {
        match self {
            Opcode::Query => 0,
            Opcode::InverseQuery => 1,
            Opcode::Status => 2,
            Opcode::Other(v) => v as u16 & 0x0f,
        }
    }

    fn from_u16(value: u16) -> Self {
        match value {
            0 => Opcode::Query,
            1 => Opcode::InverseQuery,
            2 => Opcode::Status,
            other => Opcode::Other(other as u8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rcode {
    Success,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Other(u8),
}

impl Rcode {
    fn to_u16(self) -> u16 {
        match self {
            Rcode::Success => 0,
            Rcode::FormatError => 1,
            Rcode::ServerFailure => 2,
            Rcode::NameError => 3,
            Rcode::NotImplemented => 4,
            Rcode::Refused => 5,
            Rcode::Other(v) => v as u16 & 0x0f,
        }
    }

    fn from_u16(value: u16) -> Self {
        match value {
            0 => Rcode::Success,
            1 => Rcode::FormatError,
            2 => Rcode::ServerFailure,
            3 => Rcode::NameError,
            4 => Rcode::NotImplemented,
            5 => Rcode::Refused,
            other => Rcode::Other(other as u8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub rtype: RecordType,
    pub class: u16,
}

/// Parsed record data for the supported types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Ns(String),
    Mx { preference: u16, exchange: String },
    Txt(Vec<u8>),
    Other { rtype: u16, data: Vec<u8> },
}

impl RData {
    pub fn rtype(&self) -> RecordType {
        match self {
            RData::A(_) => RecordType::A,
            RData::Aaaa(_) => RecordType::Aaaa,
            RData::Cname(_) => RecordType::Cname,
            RData::Ns(_) => RecordType::Ns,
            RData::Mx { .. } => RecordType::Mx,
            RData::Txt(_) => RecordType::Txt,
            RData::Other { rtype, .. } => RecordType::Other(*rtype),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub class: u16,
    pub ttl: u32,
    pub rdata: RData,
}

/// One DNS message, either direction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub id: u16,
    pub response: bool,
    pub opcode: Opcode,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub rcode: Rcode,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Default for Opcode {
    fn default() -> Self {
        Opcode::Query
    }
}

impl Default for Rcode {
    fn default() -> Self {
        Rcode::Success
    }
}

impl Message {
    /// A recursion-desired query for a single name.
    pub fn query(id: u16, name: impl Into<String>, rtype: RecordType) -> Self {
        Self {
            id,
            recursion_desired: true,
            questions: vec![Question {
                name: name.into(),
                rtype,
                class: CLASS_IN,
            }],
            ..Default::default()
        }
    }

    pub fn parse(data: &[u8]) -> Result<Message, DnsError> {
        if data.len() < HEADER_LEN {
            return Err(DnsError::Truncated(data.len()));
        }

        let mut buf = ByteBuffer::with_data(data);
        let id = read_u16(&mut buf)?;
        let flags = read_u16(&mut buf)?;
        let question_count = read_u16(&mut buf)?;
        let answer_count = read_u16(&mut buf)?;
        let authority_count = read_u16(&mut buf)?;
        let additional_count = read_u16(&mut buf)?;

        let mut message = Message {
            id,
            response: flags & FLAG_QR != 0,
            opcode: Opcode::from_u16((flags >> 11) & 0x0f),
            authoritative: flags & FLAG_AA != 0,
            truncated: flags & FLAG_TC != 0,
            recursion_desired: flags & FLAG_RD != 0,
            recursion_available: flags & FLAG_RA != 0,
            rcode: Rcode::from_u16(flags & 0x0f),
            ..Default::default()
        };

        for _ in 0..question_count {
            let (name, used) = read_name(data, buf.position())?;
            skip(&mut buf, used)?;
            message.questions.push(Question {
                name,
                rtype: RecordType::from_u16(read_u16(&mut buf)?),
                class: read_u16(&mut buf)?,
            });
        }
        for _ in 0..answer_count {
            message.answers.push(parse_record(data, &mut buf)?);
        }
        for _ in 0..authority_count {
            message.authorities.push(parse_record(data, &mut buf)?);
        }
        for _ in 0..additional_count {
            message.additionals.push(parse_record(data, &mut buf)?);
        }

        Ok(message)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DnsError> {
        let mut buf = ByteBuffer::new();

        let mut flags = (self.opcode.to_u16() << 11) | self.rcode.to_u16();
        if self.response {
            flags |= FLAG_QR;
        }
        if self.authoritative {
            flags |= FLAG_AA;
        }
        if self.truncated {
            flags |= FLAG_TC;
        }
        if self.recursion_desired {
            flags |= FLAG_RD;
        }
        if self.recursion_available {
            flags |= FLAG_RA;
        }

        buf.add_u16(self.id);
        buf.add_u16(flags);
        buf.add_u16(self.questions.len() as u16);
        buf.add_u16(self.answers.len() as u16);
        buf.add_u16(self.authorities.len() as u16);
        buf.add_u16(self.additionals.len() as u16);

        for question in &self.questions {
            write_name(&mut buf, &question.name)?;
            buf.add_u16(question.rtype.to_u16());
            buf.add_u16(question.class);
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            write_record(&mut buf, record)?;
        }

        Ok(buf.into_vec())
    }
}

fn read_u16(buf: &mut ByteBuffer) -> Result<u16, DnsError> {
    let at = buf.position();
    buf.read_u16().map_err(|_| DnsError::Truncated(at))
}

fn read_u32(buf: &mut ByteBuffer) -> Result<u32, DnsError> {
    let at = buf.position();
    buf.read_u32().map_err(|_| DnsError::Truncated(at))
}

fn skip(buf: &mut ByteBuffer, count: usize) -> Result<(), DnsError> {
    let at = buf.position();
    buf.read_bytes(count).map(|_| ()).map_err(|_| DnsError::Truncated(at))
}

fn parse_record(data: &[u8], buf: &mut ByteBuffer) -> Result<Record, DnsError> {
    let (name, used) = read_name(data, buf.position())?;
    skip(buf, used)?;

    let rtype = read_u16(buf)?;
    let class = read_u16(buf)?;
    let ttl = read_u32(buf)?;
    let rdlength = read_u16(buf)? as usize;

    let rdata_start = buf.position();
    if data.len() < rdata_start + rdlength {
        return Err(DnsError::Truncated(rdata_start));
    }

    let rdata = match RecordType::from_u16(rtype) {
        RecordType::A => {
            if rdlength != 4 {
                return Err(DnsError::BadRecordLength(rdlength));
            }
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&data[rdata_start..rdata_start + 4]);
            RData::A(Ipv4Addr::from(octets))
        }
        RecordType::Aaaa => {
            if rdlength != 16 {
                return Err(DnsError::BadRecordLength(rdlength));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[rdata_start..rdata_start + 16]);
            RData::Aaaa(Ipv6Addr::from(octets))
        }
        RecordType::Cname => {
            let (target, _) = read_name(data, rdata_start)?;
            RData::Cname(target)
        }
        RecordType::Ns => {
            let (target, _) = read_name(data, rdata_start)?;
            RData::Ns(target)
        }
        RecordType::Mx => {
            if rdlength < 3 {
                return Err(DnsError::BadRecordLength(rdlength));
            }
            let preference =
                u16::from_be_bytes([data[rdata_start], data[rdata_start + 1]]);
            let (exchange, _) = read_name(data, rdata_start + 2)?;
            RData::Mx { preference, exchange }
        }
        RecordType::Txt => {
            if rdlength == 0 {
                return Err(DnsError::BadRecordLength(rdlength));
            }
            // Only the first character-string matters to us.
            let text_len = data[rdata_start] as usize;
            if text_len + 1 > rdlength {
                return Err(DnsError::BadRecordLength(rdlength));
            }
            RData::Txt(data[rdata_start + 1..rdata_start + 1 + text_len].to_vec())
        }
        RecordType::Other(_) => RData::Other {
            rtype,
            data: data[rdata_start..rdata_start + rdlength].to_vec(),
        },
    };

    skip(buf, rdlength)?;

    Ok(Record { name, class, ttl, rdata })
}

fn write_record(buf: &mut ByteBuffer, record: &Record) -> Result<(), DnsError> {
    write_name(buf, &record.name)?;
    buf.add_u16(record.rdata.rtype().to_u16());
    buf.add_u16(record.class);
    buf.add_u32(record.ttl);

    let mut rdata = ByteBuffer::new();
    match &record.rdata {
        RData::A(addr) => rdata.add_bytes(&addr.octets()),
        RData::Aaaa(addr) => rdata.add_bytes(&addr.octets()),
        RData::Cname(target) => write_name(&mut rdata, target)?,
        RData::Ns(target) => write_name(&mut rdata, target)?,
        RData::Mx { preference, exchange } => {
            rdata.add_u16(*preference);
            write_name(&mut rdata, exchange)?;
        }
        RData::Txt(text) => {
            if text.len() > 255 {
                return Err(DnsError::TxtTooLong);
            }
            rdata.add_u8(text.len() as u8);
            rdata.add_bytes(text);
        }
        RData::Other { data, .. } => rdata.add_bytes(data),
    }

    buf.add_u16(rdata.len() as u16);
    buf.add_bytes(rdata.as_slice());
    Ok(())
}
