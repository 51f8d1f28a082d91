//! Packet text normalization before upload
//!
//! Both rewrites work on the TNC2 text form (`SRC>DEST,PATH...:INFO`) and
//! leave the information field untouched. Text that does not look like a
//! TNC2 line is returned unchanged.

/// q-construct appended by a receive-only gateway
pub const Q_CONSTRUCT_RECEIVED: &str = "qAR";

/// Parsed TNC2 header borrowing from the original line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tnc2Line<'a> {
    pub source: &'a str,
    pub destination: &'a str,
    pub path: Vec<&'a str>,
    pub info: &'a str,
}

impl<'a> Tnc2Line<'a> {
    /// Split a TNC2 line into its header fields and info
    pub fn parse(text: &'a str) -> Option<Self> {
        let (header, info) = text.split_once(':')?;
        let (source, rest) = header.split_once('>')?;

        let mut fields = rest.split(',');
        let destination = fields.next().filter(|d| !d.is_empty())?;
        if source.is_empty() {
            return None;
        }

        Some(Self {
            source,
            destination,
            path: fields.collect(),
            info,
        })
    }

    /// Render back to TNC2 text
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(
            self.source.len() + self.destination.len() + self.info.len() + 16,
        );
        out.push_str(self.source);
        out.push('>');
        out.push_str(self.destination);
        for element in &self.path {
            out.push(',');
            out.push_str(element);
        }
        out.push(':');
        out.push_str(self.info);
        out
    }

    /// Whether any path element is already a q-construct
    pub fn has_q_construct(&self) -> bool {
        self.path.iter().any(|element| is_q_construct(element))
    }
}

fn is_q_construct(element: &str) -> bool {
    element.len() >= 3 && element.starts_with(['q', 'Q'])
}

/// Replace the destination of packets this station originated
///
/// Applies only when `tocall` is set and the source matches `own_callsign`,
/// ignoring ASCII case.
pub fn rewrite_destination(text: &str, own_callsign: &str, tocall: Option<&str>) -> String {
    let Some(tocall) = tocall.filter(|t| !t.is_empty()) else {
        return text.to_string();
    };
    let Some(mut line) = Tnc2Line::parse(text) else {
        return text.to_string();
    };
    if !line.source.eq_ignore_ascii_case(own_callsign.trim()) {
        return text.to_string();
    }

    line.destination = tocall;
    line.render()
}

/// Append `qAR,<GATEWAY>` unless the path already carries a q-construct
pub fn append_q_construct(text: &str, igate_callsign: &str) -> String {
    let gateway = igate_callsign.trim().to_ascii_uppercase();
    let Some(mut line) = Tnc2Line::parse(text) else {
        return text.to_string();
    };
    if line.has_q_construct() {
        return text.to_string();
    }

    line.path.push(Q_CONSTRUCT_RECEIVED);
    line.path.push(&gateway);
    line.render()
}
