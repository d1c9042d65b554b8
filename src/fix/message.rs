// =============================================================================
// FIX 4.4 message codec — tag maps, checksum, outbound builders
// =============================================================================
//
// Wire form: `8=FIX.4.4<SOH>9=<len><SOH>...body...<SOH>10=<cs><SOH>` where
// <SOH> is 0x01, <len> counts the body bytes between the BodyLength field and
// the checksum trailer, and <cs> is the byte sum of everything before `10=`
// modulo 256, zero-padded to three digits.
// =============================================================================

use chrono::Utc;

use crate::types::{Side, Symbol};

/// FIX field separator.
pub const SOH: u8 = 0x01;

// Tag numbers used across the engine. Named so call sites read as FIX, not
// as magic numbers.
pub mod tags {
    pub const MSG_TYPE: u32 = 35;
    pub const MSG_SEQ_NUM: u32 = 34;
    pub const SENDER_COMP_ID: u32 = 49;
    pub const SENDER_SUB_ID: u32 = 50;
    pub const SENDING_TIME: u32 = 52;
    pub const SYMBOL: u32 = 55;
    pub const TARGET_COMP_ID: u32 = 56;
    pub const TARGET_SUB_ID: u32 = 57;
    pub const POSS_DUP_FLAG: u32 = 43;
    pub const BEGIN_SEQ_NO: u32 = 7;
    pub const END_SEQ_NO: u32 = 16;
    pub const EXEC_ID: u32 = 17;
    pub const REF_EXEC_ID: u32 = 19;
    pub const LAST_PX: u32 = 31;
    pub const LAST_QTY: u32 = 32;
    pub const CL_ORD_ID: u32 = 11;
    pub const ORDER_QTY: u32 = 38;
    pub const ORD_STATUS: u32 = 39;
    pub const ORD_TYPE: u32 = 40;
    pub const PRICE: u32 = 44;
    pub const SIDE: u32 = 54;
    pub const TEXT: u32 = 58;
    pub const TIME_IN_FORCE: u32 = 59;
    pub const TRANSACT_TIME: u32 = 60;
    pub const ENCRYPT_METHOD: u32 = 98;
    pub const HEARTBT_INT: u32 = 108;
    pub const TEST_REQ_ID: u32 = 112;
    pub const RESET_SEQ_NUM_FLAG: u32 = 141;
    pub const NO_RELATED_SYM: u32 = 146;
    pub const EXEC_TYPE: u32 = 150;
    pub const EXEC_INST: u32 = 18;
    pub const MD_REQ_ID: u32 = 262;
    pub const SUBSCRIPTION_REQUEST_TYPE: u32 = 263;
    pub const MARKET_DEPTH: u32 = 264;
    pub const MD_UPDATE_TYPE: u32 = 265;
    pub const NO_MD_ENTRY_TYPES: u32 = 267;
    pub const MD_ENTRY_TYPE: u32 = 269;
    pub const MD_ENTRY_PX: u32 = 270;
    pub const MD_ENTRY_SIZE: u32 = 271;
    pub const SECURITY_REQ_ID: u32 = 320;
    pub const USERNAME: u32 = 553;
    pub const PASSWORD: u32 = 554;
    pub const SECURITY_LIST_REQUEST_TYPE: u32 = 559;
}

// ---------------------------------------------------------------------------
// Parsed message
// ---------------------------------------------------------------------------

/// A parsed inbound message: ordered `(tag, value)` pairs.
///
/// Repeating groups (market data entries) keep their wire order, so group
/// walking is a linear scan with `fields()`.
#[derive(Debug, Clone, Default)]
pub struct FixMessage {
    fields: Vec<(u32, String)>,
}

impl FixMessage {
    /// Parse a complete framed message. Fields that are not `tag=value` with
    /// a numeric tag are skipped; the framer has already guaranteed checksum
    /// integrity, so leniency here only drops vendor noise.
    pub fn parse(raw: &[u8]) -> FixMessage {
        let mut fields = Vec::with_capacity(24);
        for part in raw.split(|&b| b == SOH) {
            if part.is_empty() {
                continue;
            }
            let Some(eq) = part.iter().position(|&b| b == b'=') else {
                continue;
            };
            let Ok(tag_str) = std::str::from_utf8(&part[..eq]) else {
                continue;
            };
            let Ok(tag) = tag_str.parse::<u32>() else {
                continue;
            };
            let value = String::from_utf8_lossy(&part[eq + 1..]).into_owned();
            fields.push((tag, value));
        }
        FixMessage { fields }
    }

    /// First value for `tag`, if present.
    pub fn get(&self, tag: u32) -> Option<&str> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_f64(&self, tag: u32) -> Option<f64> {
        self.get(tag).and_then(|v| v.parse().ok())
    }

    pub fn get_u32(&self, tag: u32) -> Option<u32> {
        self.get(tag).and_then(|v| v.parse().ok())
    }

    pub fn msg_type(&self) -> Option<&str> {
        self.get(tags::MSG_TYPE)
    }

    pub fn seq_num(&self) -> Option<u32> {
        self.get_u32(tags::MSG_SEQ_NUM)
    }

    pub fn poss_dup(&self) -> bool {
        self.get(tags::POSS_DUP_FLAG) == Some("Y")
    }

    /// All fields in wire order, for repeating-group walks.
    pub fn fields(&self) -> &[(u32, String)] {
        &self.fields
    }
}

// ---------------------------------------------------------------------------
// Checksum / timestamps
// ---------------------------------------------------------------------------

/// Byte sum modulo 256 — the FIX tag-10 algorithm.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u32, |acc, &b| acc + b as u32) as u8
}

/// UTC SendingTime with millisecond precision (`YYYYMMDD-HH:MM:SS.sss`).
/// Fixed width, so lexical comparison is chronological comparison — the
/// regression check relies on this.
pub fn sending_time() -> String {
    Utc::now().format("%Y%m%d-%H:%M:%S%.3f").to_string()
}

// ---------------------------------------------------------------------------
// Outbound builders
// ---------------------------------------------------------------------------

/// Header identity for one session; the sub-id distinguishes QUOTE from TRADE.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub sub_id: String,
}

/// Incrementally builds a message body, then frames it.
struct BodyWriter {
    body: Vec<u8>,
}

impl BodyWriter {
    fn new(msg_type: &str, identity: &SessionIdentity, seq: u32) -> Self {
        let mut w = BodyWriter { body: Vec::with_capacity(256) };
        w.field(tags::MSG_TYPE, msg_type);
        w.field(tags::SENDER_COMP_ID, &identity.sender_comp_id);
        w.field(tags::TARGET_COMP_ID, &identity.target_comp_id);
        w.field(tags::SENDER_SUB_ID, &identity.sub_id);
        w.field(tags::TARGET_SUB_ID, &identity.sub_id);
        w.field(tags::MSG_SEQ_NUM, &seq.to_string());
        w.field(tags::SENDING_TIME, &sending_time());
        w
    }

    fn field(&mut self, tag: u32, value: &str) -> &mut Self {
        self.body.extend_from_slice(tag.to_string().as_bytes());
        self.body.push(b'=');
        self.body.extend_from_slice(value.as_bytes());
        self.body.push(SOH);
        self
    }

    /// Wrap the body with BeginString/BodyLength and the checksum trailer.
    fn frame(self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(self.body.len() + 32);
        msg.extend_from_slice(b"8=FIX.4.4");
        msg.push(SOH);
        msg.extend_from_slice(format!("9={}", self.body.len()).as_bytes());
        msg.push(SOH);
        msg.extend_from_slice(&self.body);
        let cs = checksum(&msg);
        msg.extend_from_slice(format!("10={cs:03}").as_bytes());
        msg.push(SOH);
        msg
    }
}

pub fn build_logon(
    identity: &SessionIdentity,
    seq: u32,
    heartbeat_interval: u32,
    reset_seq_num: bool,
    username: &str,
    password: &str,
) -> Vec<u8> {
    let mut w = BodyWriter::new("A", identity, seq);
    w.field(tags::ENCRYPT_METHOD, "0");
    w.field(tags::HEARTBT_INT, &heartbeat_interval.to_string());
    if reset_seq_num {
        w.field(tags::RESET_SEQ_NUM_FLAG, "Y");
    }
    w.field(tags::USERNAME, username);
    w.field(tags::PASSWORD, password);
    w.frame()
}

pub fn build_logout(identity: &SessionIdentity, seq: u32) -> Vec<u8> {
    BodyWriter::new("5", identity, seq).frame()
}

/// Heartbeat; echoes the TestReqID when answering a TestRequest.
pub fn build_heartbeat(identity: &SessionIdentity, seq: u32, test_req_id: Option<&str>) -> Vec<u8> {
    let mut w = BodyWriter::new("0", identity, seq);
    if let Some(id) = test_req_id {
        w.field(tags::TEST_REQ_ID, id);
    }
    w.frame()
}

pub fn build_resend_request(
    identity: &SessionIdentity,
    seq: u32,
    begin: u32,
    end: u32,
) -> Vec<u8> {
    let mut w = BodyWriter::new("2", identity, seq);
    w.field(tags::BEGIN_SEQ_NO, &begin.to_string());
    w.field(tags::END_SEQ_NO, &end.to_string());
    w.frame()
}

pub fn build_security_list_request(identity: &SessionIdentity, seq: u32) -> Vec<u8> {
    let mut w = BodyWriter::new("x", identity, seq);
    w.field(tags::SECURITY_REQ_ID, &format!("ListReq-{seq}"));
    w.field(tags::SECURITY_LIST_REQUEST_TYPE, "1");
    w.frame()
}

/// Top-of-book snapshot subscription for all traded symbols.
pub fn build_market_data_request(identity: &SessionIdentity, seq: u32) -> Vec<u8> {
    let mut w = BodyWriter::new("V", identity, seq);
    w.field(tags::MD_REQ_ID, &format!("MDReq-{seq}"));
    w.field(tags::SUBSCRIPTION_REQUEST_TYPE, "1");
    w.field(tags::MARKET_DEPTH, "1");
    w.field(tags::MD_UPDATE_TYPE, "0");
    w.field(tags::NO_RELATED_SYM, &Symbol::COUNT.to_string());
    for sym in Symbol::ALL {
        w.field(tags::SYMBOL, sym.fix_name());
    }
    w.field(tags::NO_MD_ENTRY_TYPES, "2");
    w.field(tags::MD_ENTRY_TYPE, "0");
    w.field(tags::MD_ENTRY_TYPE, "1");
    w.frame()
}

/// Parameters for a NewOrderSingle.
#[derive(Debug, Clone)]
pub struct NewOrderSingle {
    pub cl_ord_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    /// `Some(px)` emits a limit order; `None` a market order (taker path).
    pub limit_price: Option<f64>,
    /// ExecInst 18=6 (participate-don't-initiate) when set.
    pub post_only: bool,
}

pub fn build_new_order_single(
    identity: &SessionIdentity,
    seq: u32,
    order: &NewOrderSingle,
) -> Vec<u8> {
    let mut w = BodyWriter::new("D", identity, seq);
    w.field(tags::CL_ORD_ID, &order.cl_ord_id);
    w.field(tags::SYMBOL, order.symbol.fix_name());
    w.field(tags::SIDE, &order.side.fix_code().to_string());
    w.field(tags::TRANSACT_TIME, &sending_time());
    w.field(tags::ORDER_QTY, &format_qty(order.quantity));
    match order.limit_price {
        Some(px) => {
            w.field(tags::ORD_TYPE, "2");
            w.field(tags::PRICE, &format_px(px));
        }
        None => {
            w.field(tags::ORD_TYPE, "1");
        }
    }
    if order.post_only {
        w.field(tags::EXEC_INST, "6");
    }
    w.field(tags::TIME_IN_FORCE, "0");
    w.frame()
}

fn format_qty(qty: f64) -> String {
    format!("{qty:.2}")
}

fn format_px(px: f64) -> String {
    format!("{px:.3}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> SessionIdentity {
        SessionIdentity {
            sender_comp_id: "CHIMERA".into(),
            target_comp_id: "BROKER".into(),
            sub_id: "QUOTE".into(),
        }
    }

    fn frame_str(raw: &[u8]) -> String {
        String::from_utf8_lossy(raw).replace('\x01', "|")
    }

    #[test]
    fn checksum_matches_transmitted_value() {
        let msg = build_heartbeat(&identity(), 7, None);
        // everything before "10=" sums to the transmitted checksum
        let cs_pos = msg.len() - 7; // "10=NNN\x01"
        assert_eq!(&msg[cs_pos..cs_pos + 3], b"10=");
        let expected: u8 = checksum(&msg[..cs_pos]);
        let transmitted: u8 = std::str::from_utf8(&msg[cs_pos + 3..cs_pos + 6])
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(expected, transmitted);
    }

    #[test]
    fn body_length_counts_body_only() {
        let msg = build_logout(&identity(), 3);
        let s = frame_str(&msg);
        let len_field = s
            .split('|')
            .find(|f| f.starts_with("9="))
            .unwrap();
        let declared: usize = len_field[2..].parse().unwrap();
        // body spans from after "9=<len>|" up to "10="
        let header_end = s.find(&format!("9={declared}|")).unwrap() + len_field.len() + 1;
        let cs_start = s.rfind("10=").unwrap();
        assert_eq!(cs_start - header_end, declared);
    }

    #[test]
    fn parse_round_trip() {
        let raw = build_logon(&identity(), 1, 30, true, "user", "pass");
        let msg = FixMessage::parse(&raw);
        assert_eq!(msg.msg_type(), Some("A"));
        assert_eq!(msg.seq_num(), Some(1));
        assert_eq!(msg.get(tags::RESET_SEQ_NUM_FLAG), Some("Y"));
        assert_eq!(msg.get(tags::USERNAME), Some("user"));
        assert_eq!(msg.get(tags::HEARTBT_INT), Some("30"));
        assert_eq!(msg.get(tags::SENDER_SUB_ID), Some("QUOTE"));
    }

    #[test]
    fn parse_skips_malformed_fields() {
        let raw = b"8=FIX.4.4\x01garbage\x0135=0\x01=novalue\x0110=000\x01";
        let msg = FixMessage::parse(raw);
        assert_eq!(msg.msg_type(), Some("0"));
    }

    #[test]
    fn market_data_request_lists_both_symbols() {
        let raw = build_market_data_request(&identity(), 5);
        let msg = FixMessage::parse(&raw);
        let symbols: Vec<&str> = msg
            .fields()
            .iter()
            .filter(|(t, _)| *t == tags::SYMBOL)
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(symbols, vec!["XAUUSD", "XAGUSD"]);
        assert_eq!(msg.get(tags::MARKET_DEPTH), Some("1"));
    }

    #[test]
    fn new_order_single_limit_vs_market() {
        let base = NewOrderSingle {
            cl_ord_id: "CHM-1".into(),
            symbol: Symbol::Xau,
            side: Side::Buy,
            quantity: 1.5,
            limit_price: Some(2000.25),
            post_only: true,
        };
        let limit = FixMessage::parse(&build_new_order_single(&identity(), 9, &base));
        assert_eq!(limit.get(tags::ORD_TYPE), Some("2"));
        assert_eq!(limit.get(tags::PRICE), Some("2000.250"));
        assert_eq!(limit.get(tags::EXEC_INST), Some("6"));
        assert_eq!(limit.get(tags::ORDER_QTY), Some("1.50"));

        let market_order = NewOrderSingle {
            limit_price: None,
            post_only: false,
            ..base
        };
        let market = FixMessage::parse(&build_new_order_single(&identity(), 10, &market_order));
        assert_eq!(market.get(tags::ORD_TYPE), Some("1"));
        assert_eq!(market.get(tags::PRICE), None);
        assert_eq!(market.get(tags::EXEC_INST), None);
    }

    #[test]
    fn sending_time_is_fix_format() {
        let ts = sending_time();
        assert!(ts.len() >= 17, "got {ts}");
        assert_eq!(ts.as_bytes()[8], b'-');
    }
}
