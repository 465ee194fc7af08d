/// Compute the one-byte frame checksum over the command byte, the code
/// byte and the payload.
///
/// The checksum is an 8-bit sum with end-around carry, complemented. Each
/// addition can overflow the low byte by at most one carry, so folding
/// with `(s & 0xFF) + 1` after every step is exact.
pub fn checksum(command: u8, code: u8, payload: &[u8]) -> u8 {
    let mut sum = u16::from(command) + u16::from(code);
    if sum > 255 {
        sum = (sum & 0xFF) + 1;
    }
    for &byte in payload {
        sum += u16::from(byte);
        if sum > 255 {
            sum = (sum & 0xFF) + 1;
        }
    }
    !(sum as u8)
}
