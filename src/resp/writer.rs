//! RESP command encoder.
//!
//! Commands are always sent as an array of bulk strings:
//! `*<N>\r\n$<len>\r\narg1\r\n…`

use itoa::Buffer;

/// Encode one command into RESP wire format. Arguments are binary safe.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Vec<u8> {
    let cap = 16 + args.iter().map(|a| a.as_ref().len() + 16).sum::<usize>();
    let mut buf = Vec::with_capacity(cap);
    let mut digits = Buffer::new();

    buf.push(b'*');
    buf.extend_from_slice(digits.format(args.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");

    for arg in args {
        let arg = arg.as_ref();
        buf.push(b'$');
        buf.extend_from_slice(digits.format(arg.len()).as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_set() {
        assert_eq!(
            encode_command(&["SET", "key", "value"]),
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n".to_vec()
        );
    }

    #[test]
    fn encode_binary_and_empty() {
        let args: [&[u8]; 2] = [b"SET", b""];
        assert_eq!(encode_command(&args), b"*2\r\n$3\r\nSET\r\n$0\r\n\r\n".to_vec());
    }

    #[test]
    fn encode_owned_strings() {
        let args = vec!["SELECT".to_string(), "12".to_string()];
        assert_eq!(
            encode_command(&args),
            b"*2\r\n$6\r\nSELECT\r\n$2\r\n12\r\n".to_vec()
        );
    }
}
