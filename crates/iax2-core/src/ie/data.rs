use std::net::SocketAddrV4;

use bytes::Bytes;
use chrono::NaiveDateTime;

use super::{IeList, IeType, IeValue};

/// Named view of the elements the call processor cares about.
///
/// Built from an [`IeList`]; invalid elements are skipped and the first valid
/// occurrence of a type wins, except `Variable` which may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IeData {
    pub called_number: Option<String>,
    pub calling_number: Option<String>,
    pub calling_ani: Option<String>,
    pub calling_name: Option<String>,
    pub called_context: Option<String>,
    pub user_name: Option<String>,
    pub password: Option<String>,
    pub capability: Option<u32>,
    pub format: Option<u32>,
    pub language: Option<String>,
    pub version: Option<u16>,
    pub dnid: Option<String>,
    pub auth_methods: Option<u16>,
    pub challenge: Option<String>,
    pub md5_result: Option<String>,
    pub rsa_result: Option<String>,
    pub apparent_addr: Option<SocketAddrV4>,
    pub refresh: Option<u16>,
    pub dp_status: Option<u16>,
    pub call_no: Option<u16>,
    pub cause: Option<String>,
    pub iax_unknown: Option<u8>,
    pub msg_count: Option<u16>,
    pub auto_answer: bool,
    pub music_on_hold: bool,
    pub transfer_id: Option<u32>,
    pub rdnis: Option<String>,
    pub date_time: Option<NaiveDateTime>,
    pub device_type: Option<String>,
    pub firmware_version: Option<u16>,
    pub calling_pres: Option<u8>,
    pub calling_ton: Option<u8>,
    pub calling_tns: Option<u16>,
    pub sampling_rate: Option<u16>,
    pub cause_code: Option<u8>,
    pub encryption: Option<u16>,
    pub enc_key: Option<Bytes>,
    pub codec_prefs: Option<String>,
    pub rr_jitter: Option<u32>,
    pub rr_loss: Option<u32>,
    pub rr_pkts: Option<u32>,
    pub rr_delay: Option<u16>,
    pub rr_dropped: Option<u32>,
    pub rr_ooo: Option<u32>,
    pub variables: Vec<String>,
    pub osp_token: Option<Bytes>,
    /// Present (possibly empty) when the peer supports call tokens
    pub call_token: Option<Bytes>,
}

fn set<T>(slot: &mut Option<T>, value: T) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

impl IeData {
    pub fn from_list(list: &IeList) -> Self {
        let mut d = IeData::default();
        for ie in list.iter().filter(|ie| ie.is_valid()) {
            let Some(ie_type) = ie.ie_type() else { continue };
            match (ie_type, ie.value().clone()) {
                (IeType::CalledNumber, IeValue::String(s)) => set(&mut d.called_number, s),
                (IeType::CallingNumber, IeValue::String(s)) => set(&mut d.calling_number, s),
                (IeType::CallingAni, IeValue::String(s)) => set(&mut d.calling_ani, s),
                (IeType::CallingName, IeValue::String(s)) => set(&mut d.calling_name, s),
                (IeType::CalledContext, IeValue::String(s)) => set(&mut d.called_context, s),
                (IeType::Username, IeValue::String(s)) => set(&mut d.user_name, s),
                (IeType::Password, IeValue::String(s)) => set(&mut d.password, s),
                (IeType::Capability, IeValue::U32(v)) => set(&mut d.capability, v),
                (IeType::Format, IeValue::U32(v)) => set(&mut d.format, v),
                (IeType::Language, IeValue::String(s)) => set(&mut d.language, s),
                (IeType::Version, IeValue::U16(v)) => set(&mut d.version, v),
                (IeType::Dnid, IeValue::String(s)) => set(&mut d.dnid, s),
                (IeType::AuthMethods, IeValue::U16(v)) => set(&mut d.auth_methods, v),
                (IeType::Challenge, IeValue::String(s)) => set(&mut d.challenge, s),
                (IeType::Md5Result, IeValue::String(s)) => set(&mut d.md5_result, s),
                (IeType::RsaResult, IeValue::String(s)) => set(&mut d.rsa_result, s),
                (IeType::ApparentAddr, IeValue::SockAddr(a)) => set(&mut d.apparent_addr, a),
                (IeType::Refresh, IeValue::U16(v)) => set(&mut d.refresh, v),
                (IeType::DpStatus, IeValue::U16(v)) => set(&mut d.dp_status, v),
                (IeType::CallNo, IeValue::U16(v)) => set(&mut d.call_no, v),
                (IeType::Cause, IeValue::String(s)) => set(&mut d.cause, s),
                (IeType::IaxUnknown, IeValue::U8(v)) => set(&mut d.iax_unknown, v),
                (IeType::MsgCount, IeValue::U16(v)) => set(&mut d.msg_count, v),
                (IeType::AutoAnswer, _) => d.auto_answer = true,
                (IeType::MusicOnHold, _) => d.music_on_hold = true,
                (IeType::TransferId, IeValue::U32(v)) => set(&mut d.transfer_id, v),
                (IeType::Rdnis, IeValue::String(s)) => set(&mut d.rdnis, s),
                (IeType::DateTime, IeValue::DateTime(dt)) => set(&mut d.date_time, dt),
                (IeType::DeviceType, IeValue::String(s)) => set(&mut d.device_type, s),
                (IeType::FirmwareVer, IeValue::U16(v)) => set(&mut d.firmware_version, v),
                (IeType::CallingPres, IeValue::U8(v)) => set(&mut d.calling_pres, v),
                (IeType::CallingTon, IeValue::U8(v)) => set(&mut d.calling_ton, v),
                (IeType::CallingTns, IeValue::U16(v)) => set(&mut d.calling_tns, v),
                (IeType::SamplingRate, IeValue::U16(v)) => set(&mut d.sampling_rate, v),
                (IeType::CauseCode, IeValue::U8(v)) => set(&mut d.cause_code, v),
                (IeType::Encryption, IeValue::U16(v)) => set(&mut d.encryption, v),
                (IeType::EncKey, IeValue::Binary(b)) => set(&mut d.enc_key, b),
                (IeType::CodecPrefs, IeValue::String(s)) => set(&mut d.codec_prefs, s),
                (IeType::RrJitter, IeValue::U32(v)) => set(&mut d.rr_jitter, v),
                (IeType::RrLoss, IeValue::U32(v)) => set(&mut d.rr_loss, v),
                (IeType::RrPkts, IeValue::U32(v)) => set(&mut d.rr_pkts, v),
                (IeType::RrDelay, IeValue::U16(v)) => set(&mut d.rr_delay, v),
                (IeType::RrDropped, IeValue::U32(v)) => set(&mut d.rr_dropped, v),
                (IeType::RrOoo, IeValue::U32(v)) => set(&mut d.rr_ooo, v),
                (IeType::Variable, IeValue::String(s)) => d.variables.push(s),
                (IeType::OspToken, IeValue::Binary(b)) => set(&mut d.osp_token, b),
                (IeType::CallToken, IeValue::Binary(b)) => set(&mut d.call_token, b),
                // provisioning and firmware elements carry nothing for a call
                _ => {}
            }
        }
        d
    }

    /// Whether the peer asked for AES-128 payload encryption
    pub fn wants_aes128(&self) -> bool {
        self.encryption.map_or(false, |e| e & super::ENCRYPT_AES128 != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Ie;
    use super::*;

    #[test]
    fn test_first_valid_occurrence_wins() {
        let mut list = IeList::new();
        list.push(Ie::decode(IeType::Format as u8, &[0, 1])); // wrong size, invalid
        list.push(Ie::u32(IeType::Format, 4).unwrap());
        list.push(Ie::u32(IeType::Format, 8).unwrap());
        list.push(Ie::string(IeType::Variable, "a=1").unwrap());
        list.push(Ie::string(IeType::Variable, "b=2").unwrap());
        list.push(Ie::binary(IeType::CallToken, Bytes::new()).unwrap());

        let data = IeData::from_list(&list);
        assert_eq!(data.format, Some(4));
        assert_eq!(data.variables, vec!["a=1".to_string(), "b=2".to_string()]);
        assert_eq!(data.call_token, Some(Bytes::new()));
    }

    #[test]
    fn test_encryption_flag() {
        let list = IeList::new().with(Ie::u16(IeType::Encryption, 1).unwrap());
        assert!(IeData::from_list(&list).wants_aes128());
        assert!(!IeData::default().wants_aes128());
    }
}
