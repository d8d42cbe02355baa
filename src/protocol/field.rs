//! 字段编解码
//!
//! - 定长基础类型直接写入（大端序），无长度前缀
//! - 变长字节序列：长度 < 0x7FFF 时写 16 位长度；否则写 0x7FFF 再写 32 位的 `length - 0x7FFF`
//! - 空或缺失的序列写成 16 位 0
//!
//! 读取前都会检查剩余字节数，越界返回 [`CodecError::Truncated`] 而不是 panic。

use bytes::{Buf, BufMut, Bytes};

use super::SHORT_LENGTH_LIMIT;
use crate::error::{CodecError, CodecResult};

/// 字段写入扩展
pub trait FieldWriter: BufMut {
    fn write_byte(&mut self, b: u8) {
        self.put_u8(b);
    }

    fn write_short(&mut self, s: i16) {
        self.put_i16(s);
    }

    fn write_int(&mut self, i: i32) {
        self.put_i32(i);
    }

    fn write_long(&mut self, l: i64) {
        self.put_i64(l);
    }

    fn write_float(&mut self, f: f32) {
        self.put_u32(f.to_bits());
    }

    fn write_double(&mut self, d: f64) {
        self.put_u64(d.to_bits());
    }

    fn write_boolean(&mut self, b: bool) {
        self.put_u8(u8::from(b));
    }

    /// 写入变长长度前缀
    fn write_length(&mut self, len: usize) -> CodecResult<()> {
        if len < SHORT_LENGTH_LIMIT {
            self.put_u16(len as u16);
        } else {
            let extra = u32::try_from(len - SHORT_LENGTH_LIMIT)
                .map_err(|_| CodecError::LengthOverflow(len as u64))?;
            self.put_u16(SHORT_LENGTH_LIMIT as u16);
            self.put_u32(extra);
        }
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> CodecResult<()> {
        self.write_length(bytes.len())?;
        self.put_slice(bytes);
        Ok(())
    }

    /// `None` 与空串编码相同，解码一律得到空串
    fn write_string(&mut self, content: Option<&str>) -> CodecResult<()> {
        self.write_bytes(content.map(str::as_bytes).unwrap_or_default())
    }

    fn write_longs(&mut self, values: &[i64]) -> CodecResult<()> {
        self.write_length(values.len())?;
        for value in values {
            self.put_i64(*value);
        }
        Ok(())
    }
}

impl<T: BufMut + ?Sized> FieldWriter for T {}

/// 字段读取扩展
pub trait FieldReader: Buf {
    fn ensure(&self, needed: usize) -> CodecResult<()> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(CodecError::Truncated { needed, remaining });
        }
        Ok(())
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        self.ensure(1)?;
        Ok(self.get_u8())
    }

    fn read_short(&mut self) -> CodecResult<i16> {
        self.ensure(2)?;
        Ok(self.get_i16())
    }

    fn read_int(&mut self) -> CodecResult<i32> {
        self.ensure(4)?;
        Ok(self.get_i32())
    }

    fn read_long(&mut self) -> CodecResult<i64> {
        self.ensure(8)?;
        Ok(self.get_i64())
    }

    fn read_float(&mut self) -> CodecResult<f32> {
        self.ensure(4)?;
        Ok(f32::from_bits(self.get_u32()))
    }

    fn read_double(&mut self) -> CodecResult<f64> {
        self.ensure(8)?;
        Ok(f64::from_bits(self.get_u64()))
    }

    fn read_boolean(&mut self) -> CodecResult<bool> {
        Ok(self.read_byte()? != 0)
    }

    /// 读取变长长度前缀
    fn read_length(&mut self) -> CodecResult<usize> {
        self.ensure(2)?;
        let short = self.get_u16() as usize;
        if short != SHORT_LENGTH_LIMIT {
            return Ok(short);
        }
        self.ensure(4)?;
        let total = SHORT_LENGTH_LIMIT as u64 + u64::from(self.get_u32());
        usize::try_from(total).map_err(|_| CodecError::LengthOverflow(total))
    }

    fn read_bytes(&mut self) -> CodecResult<Bytes> {
        let len = self.read_length()?;
        self.ensure(len)?;
        Ok(self.copy_to_bytes(len))
    }

    fn read_string(&mut self) -> CodecResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    fn read_longs(&mut self) -> CodecResult<Vec<i64>> {
        let len = self.read_length()?;
        let needed = len
            .checked_mul(8)
            .ok_or(CodecError::LengthOverflow(len as u64))?;
        self.ensure(needed)?;
        Ok((0..len).map(|_| self.get_i64()).collect())
    }
}

impl<T: Buf + ?Sized> FieldReader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_primitives() {
        let mut buf = BytesMut::new();
        buf.write_byte(0xFE);
        buf.write_short(-2);
        buf.write_int(i32::MIN);
        buf.write_long(i64::MAX);
        buf.write_float(1.5);
        buf.write_double(-0.25);
        buf.write_boolean(true);
        assert_eq!(buf.len(), 1 + 2 + 4 + 8 + 4 + 8 + 1);

        let mut bytes = buf.freeze();
        assert_eq!(bytes.read_byte().unwrap(), 0xFE);
        assert_eq!(bytes.read_short().unwrap(), -2);
        assert_eq!(bytes.read_int().unwrap(), i32::MIN);
        assert_eq!(bytes.read_long().unwrap(), i64::MAX);
        assert_eq!(bytes.read_float().unwrap(), 1.5);
        assert_eq!(bytes.read_double().unwrap(), -0.25);
        assert!(bytes.read_boolean().unwrap());
        assert!(matches!(bytes.read_byte(), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_length_prefix_boundaries() {
        for (len, header_len) in [(32_766usize, 2usize), (32_767, 6), (32_768, 6)] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut buf = BytesMut::new();
            buf.write_bytes(&data).unwrap();
            assert_eq!(buf.len(), header_len + len, "len {len}");

            let mut bytes = buf.freeze();
            assert_eq!(bytes.read_bytes().unwrap().as_ref(), data.as_slice());
            assert!(bytes.is_empty());
        }
    }

    #[test]
    fn test_extended_length_layout() {
        let mut buf = BytesMut::new();
        buf.write_bytes(&vec![0u8; 32_768]).unwrap();
        assert_eq!(&buf[..6], &[0x7F, 0xFF, 0, 0, 0, 1]);
    }

    #[test]
    fn test_empty_and_none_string_are_identical() {
        let mut none = BytesMut::new();
        none.write_string(None).unwrap();
        let mut empty = BytesMut::new();
        empty.write_string(Some("")).unwrap();
        assert_eq!(none, empty);
        assert_eq!(none.as_ref(), &[0, 0]);

        let mut bytes = none.freeze();
        assert_eq!(bytes.read_string().unwrap(), "");
    }

    #[test]
    fn test_utf8_string() {
        let mut buf = BytesMut::new();
        buf.write_string(Some("飞流 flare")).unwrap();
        let mut bytes = buf.freeze();
        assert_eq!(bytes.read_string().unwrap(), "飞流 flare");
    }

    #[test]
    fn test_invalid_utf8() {
        let mut buf = BytesMut::new();
        buf.write_bytes(&[0xFF, 0xFE]).unwrap();
        let mut bytes = buf.freeze();
        assert!(matches!(bytes.read_string(), Err(CodecError::InvalidUtf8)));
    }

    #[test]
    fn test_longs() {
        let mut buf = BytesMut::new();
        buf.write_longs(&[1, -1, i64::MIN]).unwrap();
        buf.write_longs(&[]).unwrap();
        let mut bytes = buf.freeze();
        assert_eq!(bytes.read_longs().unwrap(), vec![1, -1, i64::MIN]);
        assert!(bytes.read_longs().unwrap().is_empty());
    }

    #[test]
    fn test_length_exceeding_buffer_fails() {
        // 声明 10 字节，实际只有 3 字节
        let mut bytes = Bytes::from_static(&[0, 10, 1, 2, 3]);
        assert!(matches!(
            bytes.read_bytes(),
            Err(CodecError::Truncated { needed: 10, remaining: 3 })
        ));

        // 扩展长度声明约 4GB
        let mut bytes = Bytes::from_static(&[0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 1]);
        assert!(matches!(bytes.read_bytes(), Err(CodecError::Truncated { .. })));

        // 扩展长度本身被截断
        let mut bytes = Bytes::from_static(&[0x7F, 0xFF, 0]);
        assert!(matches!(bytes.read_bytes(), Err(CodecError::Truncated { .. })));

        let mut bytes = Bytes::from_static(&[0, 3, 0, 0]);
        assert!(matches!(bytes.read_longs(), Err(CodecError::Truncated { needed: 24, .. })));
    }
}
