use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use e2d_core::geometry::GridIndex;
use tracing::error;

use crate::CodecError;
use crate::records::{LvlEntity, LvlHeader, LvlLayer, SIGNATURE_VERSION};

/// 写入顺序：头部 -> 图层 -> 单元格。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Header,
    Layer,
    Entity,
}

/// `.lvl` 流写入器。
///
/// 写满 `width * height` 个单元格后自动回到 `Layer` 状态，调用方可以连续写入
/// 多个图层。顺序错误返回 [`CodecError::OrderViolation`]。
pub struct LvlWriter<W: Write> {
    inner: W,
    state: WriterState,
    cells_per_layer: usize,
    written: usize,
}

impl<W: Write> LvlWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            state: WriterState::Header,
            cells_per_layer: 0,
            written: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write_header(&mut self, header: &LvlHeader) -> Result<(), CodecError> {
        self.expect(WriterState::Header)?;

        let out = &mut self.inner;
        out.write_u32::<LittleEndian>(SIGNATURE_VERSION)?;
        out.write_u16::<LittleEndian>(header.layers)?;
        out.write_u16::<LittleEndian>(header.palette)?;
        out.write_u16::<LittleEndian>(header.width)?;
        out.write_u16::<LittleEndian>(header.height)?;

        let camera = &header.camera;
        out.write_f32::<LittleEndian>(camera.x)?;
        out.write_f32::<LittleEndian>(camera.y)?;
        out.write_f32::<LittleEndian>(camera.z)?;
        out.write_f32::<LittleEndian>(camera.ortho_size)?;
        out.write_all(&camera.color)?;
        out.write_u8(u8::from(camera.set_color))?;

        write_string(out, &header.name)?;
        write_string(out, &header.author)?;

        self.cells_per_layer = header.cells_per_layer();
        self.state = WriterState::Layer;
        Ok(())
    }

    pub fn write_layer(&mut self, layer: &LvlLayer) -> Result<(), CodecError> {
        self.expect(WriterState::Layer)?;
        self.inner.write_i32::<LittleEndian>(layer.layer_id)?;
        self.inner.write_f32::<LittleEndian>(layer.z_depth)?;
        self.written = 0;
        self.state = if self.cells_per_layer == 0 {
            WriterState::Layer
        } else {
            WriterState::Entity
        };
        Ok(())
    }

    /// 写入一个单元格，`None` 表示空格子。
    ///
    /// 调色板下标非法时不写入任何字节，计数也不前进。
    pub fn write_entity(&mut self, entity: Option<&LvlEntity>) -> Result<(), CodecError> {
        self.expect(WriterState::Entity)?;
        let record = match entity {
            Some(entity) => entity.pack()?,
            None => 0,
        };
        self.inner.write_u16::<LittleEndian>(record)?;
        self.written += 1;
        if self.written == self.cells_per_layer {
            self.state = WriterState::Layer;
        }
        Ok(())
    }

    /// 驱动式写入整个文件：逐层调用 `layer_at`，再按 x 外层、y 内层调用 `cell_at`。
    pub fn write_all<L, C>(
        &mut self,
        header: &LvlHeader,
        mut layer_at: L,
        mut cell_at: C,
    ) -> Result<(), CodecError>
    where
        L: FnMut(usize) -> Result<LvlLayer, CodecError>,
        C: FnMut(usize, GridIndex) -> Option<LvlEntity>,
    {
        self.write_header(header)?;
        for layer in 0..header.layers as usize {
            self.write_layer(&layer_at(layer)?)?;
            for x in 0..header.width as i32 {
                for y in 0..header.height as i32 {
                    let cell = cell_at(layer, GridIndex::new(x, y));
                    self.write_entity(cell.as_ref())?;
                }
            }
        }
        self.inner.flush()?;
        Ok(())
    }

    fn expect(&self, received: WriterState) -> Result<(), CodecError> {
        if self.state == received {
            return Ok(());
        }
        error!(expected = ?self.state, received = ?received, "lvl 写入顺序错误");
        Err(CodecError::OrderViolation {
            expected: self.state,
            received,
        })
    }
}

/// 7 位变长长度前缀 + UTF-8 字节。
fn write_string<W: Write>(out: &mut W, value: &str) -> Result<(), CodecError> {
    let bytes = value.as_bytes();
    let mut length = u32::try_from(bytes.len())
        .map_err(|_| CodecError::InvalidString(format!("长度 {} 超出范围", bytes.len())))?;
    while length >= 0x80 {
        out.write_u8((length as u8 & 0x7F) | 0x80)?;
        length >>= 7;
    }
    out.write_u8(length as u8)?;
    out.write_all(bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(width: u16, height: u16, layers: u16) -> LvlHeader {
        LvlHeader {
            layers,
            palette: 4,
            width,
            height,
            ..LvlHeader::default()
        }
    }

    fn layer(id: i32) -> LvlLayer {
        LvlLayer {
            layer_id: id,
            z_depth: id as f32,
        }
    }

    #[test]
    fn entities_before_layer_are_rejected() {
        let mut writer = LvlWriter::new(Vec::new());
        assert!(matches!(
            writer.write_layer(&layer(0)),
            Err(CodecError::OrderViolation {
                expected: WriterState::Header,
                received: WriterState::Layer
            })
        ));
        writer.write_header(&header(1, 1, 1)).unwrap();
        assert!(matches!(
            writer.write_entity(None),
            Err(CodecError::OrderViolation {
                expected: WriterState::Layer,
                received: WriterState::Entity
            })
        ));
        assert!(writer.write_header(&header(1, 1, 1)).is_err());
    }

    #[test]
    fn state_returns_to_layer_after_full_grid() {
        let mut writer = LvlWriter::new(Vec::new());
        writer.write_header(&header(2, 1, 2)).unwrap();
        writer.write_layer(&layer(0)).unwrap();
        writer.write_entity(None).unwrap();
        assert_eq!(writer.state(), WriterState::Entity);
        writer.write_entity(Some(&LvlEntity::new(1))).unwrap();
        assert_eq!(writer.state(), WriterState::Layer);
        writer.write_layer(&layer(1)).unwrap();
        assert_eq!(writer.state(), WriterState::Entity);
    }

    #[test]
    fn rejected_cell_emits_no_bytes() {
        let mut writer = LvlWriter::new(Vec::new());
        writer.write_header(&header(2, 1, 1)).unwrap();
        writer.write_layer(&layer(0)).unwrap();
        let before = writer.inner.len();

        let result = writer.write_entity(Some(&LvlEntity::new(4095)));
        assert!(matches!(result, Err(CodecError::InvalidPaletteIndex(4095))));
        assert_eq!(writer.inner.len(), before);
        assert_eq!(writer.state(), WriterState::Entity);

        writer.write_entity(Some(&LvlEntity::new(4094))).unwrap();
        assert_eq!(writer.inner.len(), before + 2);
        assert_eq!(&writer.inner[before..], &0x0FFFu16.to_le_bytes());
    }

    #[test]
    fn strings_use_varint_length_prefix() {
        let mut out = Vec::new();
        write_string(&mut out, "ab").unwrap();
        assert_eq!(out, vec![2, b'a', b'b']);

        let long = "x".repeat(300);
        let mut out = Vec::new();
        write_string(&mut out, &long).unwrap();
        assert_eq!(&out[..2], &[0xAC, 0x02]);
        assert_eq!(out.len(), 302);
    }
}
