use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};
use e2d_core::geometry::GridIndex;
use tracing::error;

use crate::CodecError;
use crate::records::{LvlCamera, LvlEntity, LvlHeader, LvlLayer, SIGNATURE_VERSION};

/// `.lvl` 流读取器，提供逐条记录读取与一次性遍历两种方式。
pub struct LvlReader<R: Read> {
    inner: R,
}

impl<R: Read> LvlReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// 读取文件头。签名或版本不一致时直接失败。
    pub fn read_header(&mut self) -> Result<LvlHeader, CodecError> {
        let input = &mut self.inner;
        let signature = input.read_u32::<LittleEndian>()?;
        if signature != SIGNATURE_VERSION {
            error!("不兼容的 lvl 版本 {signature:08X}");
            return Err(CodecError::FormatMismatch {
                found: signature,
                expected: SIGNATURE_VERSION,
            });
        }

        let layers = input.read_u16::<LittleEndian>()?;
        let palette = input.read_u16::<LittleEndian>()?;
        let width = input.read_u16::<LittleEndian>()?;
        let height = input.read_u16::<LittleEndian>()?;

        let x = input.read_f32::<LittleEndian>()?;
        let y = input.read_f32::<LittleEndian>()?;
        let z = input.read_f32::<LittleEndian>()?;
        let ortho_size = input.read_f32::<LittleEndian>()?;
        let mut color = [0u8; 3];
        input.read_exact(&mut color)?;
        let set_color = input.read_u8()? != 0;

        let name = read_string(input)?;
        let author = read_string(input)?;

        Ok(LvlHeader {
            layers,
            palette,
            width,
            height,
            camera: LvlCamera {
                x,
                y,
                z,
                ortho_size,
                color,
                set_color,
            },
            name,
            author,
        })
    }

    pub fn read_layer(&mut self) -> Result<LvlLayer, CodecError> {
        Ok(LvlLayer {
            layer_id: self.inner.read_i32::<LittleEndian>()?,
            z_depth: self.inner.read_f32::<LittleEndian>()?,
        })
    }

    /// 读取一个单元格，空格子返回 `None`。
    pub fn read_entity(&mut self) -> Result<Option<LvlEntity>, CodecError> {
        let record = self.inner.read_u16::<LittleEndian>()?;
        Ok(LvlEntity::unpack(record))
    }

    /// 遍历整个流。每个图层先调用 `on_layer`；只有非空格子才调用 `on_entity`。
    /// 两个回调的第一个参数都是图层在流中的序号。
    pub fn read_all<L, E>(
        &mut self,
        mut on_layer: L,
        mut on_entity: E,
    ) -> Result<LvlHeader, CodecError>
    where
        L: FnMut(usize, LvlLayer),
        E: FnMut(usize, GridIndex, LvlEntity),
    {
        let header = self.read_header()?;
        for layer in 0..header.layers as usize {
            on_layer(layer, self.read_layer()?);
            for x in 0..header.width as i32 {
                for y in 0..header.height as i32 {
                    if let Some(entity) = self.read_entity()? {
                        on_entity(layer, GridIndex::new(x, y), entity);
                    }
                }
            }
        }
        Ok(header)
    }
}

fn read_string<R: Read>(input: &mut R) -> Result<String, CodecError> {
    let mut length: u32 = 0;
    let mut shift = 0;
    loop {
        if shift >= 35 {
            return Err(CodecError::InvalidString("长度前缀超过 5 字节".into()));
        }
        let byte = input.read_u8()?;
        length |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut bytes = Vec::new();
    let read = input.take(u64::from(length)).read_to_end(&mut bytes)?;
    if read != length as usize {
        return Err(CodecError::InvalidString(format!(
            "声明长度 {length}，实际只有 {read} 字节"
        )));
    }
    String::from_utf8(bytes).map_err(|err| CodecError::InvalidString(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn truncated_stream_reports_io_error() {
        let bytes = SIGNATURE_VERSION.to_le_bytes();
        let mut reader = LvlReader::new(Cursor::new(bytes.to_vec()));
        assert!(matches!(reader.read_header(), Err(CodecError::Io(_))));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut input = Cursor::new(vec![2u8, 0xFF, 0xFE]);
        assert!(matches!(
            read_string(&mut input),
            Err(CodecError::InvalidString(_))
        ));
    }

    #[test]
    fn overlong_length_prefix_is_rejected() {
        let mut input = Cursor::new(vec![0xFFu8; 6]);
        assert!(matches!(
            read_string(&mut input),
            Err(CodecError::InvalidString(_))
        ));
    }

    #[test]
    fn huge_declared_length_fails_without_preallocating() {
        // 0xFFFFFFFF 的 varint 编码，后面只跟 3 个字节
        let mut input = Cursor::new(vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F, b'a', b'b', b'c']);
        let err = read_string(&mut input).unwrap_err();
        assert!(matches!(err, CodecError::InvalidString(ref message) if message.contains("3")));
    }
}
