//! The greedy wildcard matcher behind §8 property 6: "the observed event
//! stream matches the declared expected sequence".
//!
//! A [`crate::scenario::SeqItem::Wildcard`] stands for zero-or-more
//! wildcardable events. It prefers consuming as many as it can (greedy) but
//! backtracks down to zero if that's the only way the rest of the sequence
//! still lines up — matching is greedy, not maximal-only.

use rbmk_observe::Msg;

use crate::scenario::SeqItem;

pub fn matches(expected: &[SeqItem], observed: &[Msg]) -> bool {
    match expected.first() {
        None => observed.is_empty(),
        Some(SeqItem::Exact(want)) => match observed.first() {
            Some(got) if got == want => matches(&expected[1..], &observed[1..]),
            _ => false,
        },
        Some(SeqItem::Wildcard) => {
            let max_run = observed.iter().take_while(|m| m.is_wildcardable()).count();

            (0..=max_run).rev().any(|take| matches(&expected[1..], &observed[take..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_sequence_must_match_exactly() {
        let expected = [SeqItem::Exact(Msg::ConnectStart), SeqItem::Exact(Msg::ConnectDone)];
        assert!(matches(&expected, &[Msg::ConnectStart, Msg::ConnectDone]));
        assert!(!matches(&expected, &[Msg::ConnectStart]));
        assert!(!matches(&expected, &[Msg::ConnectStart, Msg::ConnectDone, Msg::DnsQuery]));
    }

    #[test]
    fn wildcard_absorbs_zero_or_more_chatty_events() {
        let expected = [
            SeqItem::Exact(Msg::DnsQuery),
            SeqItem::Wildcard,
            SeqItem::Exact(Msg::DnsResponse),
        ];

        assert!(matches(&expected, &[Msg::DnsQuery, Msg::DnsResponse]));
        assert!(matches(
            &expected,
            &[Msg::DnsQuery, Msg::WriteStart, Msg::WriteDone, Msg::ReadStart, Msg::ReadDone, Msg::DnsResponse]
        ));
    }

    #[test]
    fn wildcard_does_not_absorb_non_wildcardable_events() {
        let expected = [
            SeqItem::Exact(Msg::DnsQuery),
            SeqItem::Wildcard,
            SeqItem::Exact(Msg::DnsResponse),
        ];

        assert!(!matches(&expected, &[Msg::DnsQuery, Msg::TlsHandshakeStart, Msg::DnsResponse]));
    }

    #[test]
    fn trailing_wildcard_matches_to_end_of_stream() {
        let expected = [SeqItem::Exact(Msg::DnsResponse), SeqItem::Wildcard];

        assert!(matches(&expected, &[Msg::DnsResponse, Msg::CloseStart, Msg::CloseDone]));
        assert!(matches(&expected, &[Msg::DnsResponse]));
    }
}
