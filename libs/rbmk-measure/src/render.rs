//! `dig`-style text rendering (§6: "CLI mirrors dig(1) surface").
//!
//! Three independent writers, matching the three blocks §4.F step 3 asks
//! for: the query block, the full response block, and the short form. Any
//! of them can be wired to `/dev/null` by the caller.

use std::io::{self, Write};

use dns_wire::{Query, Response};

pub fn query_block(w: &mut dyn Write, query: &Query) -> io::Result<()> {
    writeln!(w, "; <<>> rbmk dig <<>> {} {}", query.domain(), query.qtype())?;
    writeln!(w, ";; QUESTION SECTION:")?;
    writeln!(w, ";{}\t\tIN\t{}", query.domain(), query.qtype())?;
    writeln!(w)
}

pub fn response_block(w: &mut dyn Write, response: &Response) -> io::Result<()> {
    let header = response.header_summary();

    writeln!(w, ";; Got answer:")?;
    writeln!(
        w,
        ";; ->>HEADER<<- opcode: {}, status: {}, id: {}",
        header.opcode, header.rcode, header.id
    )?;

    let mut flags = String::new();
    for (set, name) in [
        (header.qr, "qr"),
        (header.aa, "aa"),
        (header.tc, "tc"),
        (header.rd, "rd"),
        (header.ra, "ra"),
    ] {
        if set {
            flags.push(' ');
            flags.push_str(name);
        }
    }

    writeln!(
        w,
        ";; flags:{flags}; QUERY: {}, ANSWER: {}, AUTHORITY: {}, ADDITIONAL: {}",
        header.qdcount, header.ancount, header.nscount, header.arcount
    )?;
    writeln!(w)?;

    writeln!(w, ";; QUESTION SECTION:")?;
    writeln!(w, ";{}\t\tIN\t{}", response.domain(), response.qtype())?;
    writeln!(w)?;

    if header.ancount > 0 {
        writeln!(w, ";; ANSWER SECTION:")?;
        for record in response.records() {
            writeln!(
                w,
                "{}\t{}\tIN\t{}\t{}",
                record.owner(),
                record.ttl(),
                record.rtype(),
                record.data()
            )?;
        }
        writeln!(w)?;
    }

    Ok(())
}

/// Which flavor of `+short` output to render (§6: `+short` vs `+short=ip`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortForm {
    /// Full RDATA for every matching answer.
    Full,
    /// A/AAAA addresses only; non-address records are silently skipped.
    IpOnly,
}

pub fn short_block(
    w: &mut dyn Write,
    query: &Query,
    response: &Response,
    form: ShortForm,
) -> io::Result<()> {
    for record in response.answers_for(query) {
        match form {
            ShortForm::Full => writeln!(w, "{}", record.data())?,
            ShortForm::IpOnly => {
                if let Some(addr) = dns_wire::record_addr(&record) {
                    writeln!(w, "{addr}")?;
                }
            }
        }
    }

    Ok(())
}
