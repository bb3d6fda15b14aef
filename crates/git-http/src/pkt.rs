//! pkt-line framing used by the smart HTTP transport.

use crate::service::Service;

/// Largest pkt-line git accepts, length prefix included.
pub const MAX_PKT_LEN: usize = 65520;

pub const PKT_FLUSH: &[u8] = b"0000";

pub const PKT_DELIM: &[u8] = b"0001";

/// Encode `data` as a single pkt-line: four lowercase hex digits giving the
/// total length (prefix included), then the payload.
pub fn encode_pkt_line(data: &[u8]) -> Vec<u8> {
    let len = 4 + data.len();
    debug_assert!(len <= MAX_PKT_LEN, "pkt-line payload too large: {len}");
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(format!("{len:04x}").as_bytes());
    out.extend_from_slice(data);
    out
}

/// The prelude written ahead of `--advertise-refs` output: one pkt-line
/// `# service=<service>\n` followed by a flush packet.
pub fn service_prelude(service: Service) -> Vec<u8> {
    let line = format!("# service={}\n", service.as_str());
    let mut out = encode_pkt_line(line.as_bytes());
    out.extend_from_slice(PKT_FLUSH);
    out
}

pub fn decode_pkt_lines(mut buf: &[u8]) -> anyhow::Result<Vec<Pkt>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        if buf.len() < 4 {
            anyhow::bail!("truncated pkt-line length");
        }
        let len = usize::from_str_radix(std::str::from_utf8(&buf[..4])?, 16)?;
        buf = &buf[4..];
        match len {
            0 => out.push(Pkt::Flush),
            1 => out.push(Pkt::Delim),
            2 | 3 => anyhow::bail!("invalid pkt-line length {len}"),
            _ => {
                let data_len = len - 4;
                if buf.len() < data_len {
                    anyhow::bail!("truncated pkt-line data");
                }
                out.push(Pkt::Data(buf[..data_len].to_vec()));
                buf = &buf[data_len..];
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pkt {
    Data(Vec<u8>),
    Flush,
    Delim,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_counts_itself() {
        let enc = encode_pkt_line(b"hello\n");
        assert_eq!(&enc[..4], b"000a");
        assert_eq!(&enc[4..], b"hello\n");
        assert_eq!(encode_pkt_line(b""), b"0004");
    }

    #[test]
    fn prelude_is_byte_exact() {
        assert_eq!(
            service_prelude(Service::UploadPack),
            b"001e# service=git-upload-pack\n0000".to_vec()
        );
        assert_eq!(
            service_prelude(Service::ReceivePack),
            b"001f# service=git-receive-pack\n0000".to_vec()
        );
    }

    #[test]
    fn decode_flush_and_delim() {
        let mut buf = encode_pkt_line(b"version 2\n");
        buf.extend_from_slice(PKT_DELIM);
        buf.extend_from_slice(PKT_FLUSH);
        let pkts = decode_pkt_lines(&buf).unwrap();
        assert_eq!(
            pkts,
            vec![Pkt::Data(b"version 2\n".to_vec()), Pkt::Delim, Pkt::Flush]
        );
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert!(decode_pkt_lines(b"00").is_err());
        assert!(decode_pkt_lines(b"000ahel").is_err());
        assert!(decode_pkt_lines(b"0002").is_err());
    }
}
