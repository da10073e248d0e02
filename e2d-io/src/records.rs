//! `.lvl` 文件中的定长记录。
//!
//! 单元格记录为 16 位：
//!
//! ```text
//! hvrrpppp pppppppp
//! h: 水平翻转  v: 垂直翻转
//! r: 旋转（00: 0°, 01: 90°, 10: 180°, 11: 270°，绕 z 轴逆时针）
//! p: 调色板下标 + 1（12 位，0 表示空格子）
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::CodecError;

pub const SIGNATURE: u32 = 0x004C_564C;
pub const VERSION: u8 = 1;
pub const SIGNATURE_VERSION: u32 = SIGNATURE | ((VERSION as u32) << 24);

/// 12 位字段能表示的最大存储值。调色板下标写入时加 1，因此合法下标为
/// `0..PALETTE_LIMIT`。
pub const PALETTE_LIMIT: u16 = 0x0FFF;

const FLIP_X_BIT: u16 = 1 << 15;
const FLIP_Y_BIT: u16 = 1 << 14;
const ROTATION_SHIFT: u16 = 12;
const ROTATION_MASK: u16 = 0b11;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LvlCamera {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub ortho_size: f32,
    pub color: [u8; 3],
    /// 加载时是否应用背景色。
    pub set_color: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LvlHeader {
    pub layers: u16,
    pub palette: u16,
    pub width: u16,
    pub height: u16,
    pub camera: LvlCamera,
    pub name: String,
    pub author: String,
}

impl LvlHeader {
    /// 每个图层的单元格记录数。
    #[inline]
    pub fn cells_per_layer(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LvlLayer {
    pub layer_id: i32,
    pub z_depth: f32,
}

/// 四种受支持的旋转，逆时针。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RotationCode {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl RotationCode {
    /// 量化到最近的四分之一圈；不是 90° 整数倍时记录警告。
    pub fn from_degrees(degrees: f32) -> Self {
        let turns = degrees / 90.0;
        let nearest = turns.round();
        if !degrees.is_finite() || (turns - nearest).abs() > 1e-3 {
            warn!(rotation = degrees, "旋转角度不是 90° 的整数倍，已量化");
        }
        let quarter = if nearest.is_finite() {
            (nearest as i64).rem_euclid(4)
        } else {
            0
        };
        Self::from_bits(quarter as u16)
    }

    #[inline]
    pub fn degrees(self) -> f32 {
        match self {
            Self::Deg0 => 0.0,
            Self::Deg90 => 90.0,
            Self::Deg180 => 180.0,
            Self::Deg270 => 270.0,
        }
    }

    #[inline]
    fn bits(self) -> u16 {
        match self {
            Self::Deg0 => 0b00,
            Self::Deg90 => 0b01,
            Self::Deg180 => 0b10,
            Self::Deg270 => 0b11,
        }
    }

    #[inline]
    fn from_bits(bits: u16) -> Self {
        match bits & ROTATION_MASK {
            0b01 => Self::Deg90,
            0b10 => Self::Deg180,
            0b11 => Self::Deg270,
            _ => Self::Deg0,
        }
    }
}

/// 一个非空格子的解码结果。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LvlEntity {
    pub palette_index: u16,
    pub rotation: RotationCode,
    pub flip_x: bool,
    pub flip_y: bool,
}

impl LvlEntity {
    pub fn new(palette_index: u16) -> Self {
        Self {
            palette_index,
            rotation: RotationCode::Deg0,
            flip_x: false,
            flip_y: false,
        }
    }

    /// 打包为 16 位记录。调色板下标超出 12 位字段时报错，不做截断。
    pub fn pack(&self) -> Result<u16, CodecError> {
        if self.palette_index >= PALETTE_LIMIT {
            return Err(CodecError::InvalidPaletteIndex(self.palette_index as usize));
        }
        let mut record = self.palette_index + 1;
        record |= self.rotation.bits() << ROTATION_SHIFT;
        if self.flip_x {
            record |= FLIP_X_BIT;
        }
        if self.flip_y {
            record |= FLIP_Y_BIT;
        }
        Ok(record)
    }

    /// 解包 16 位记录；调色板字段为 0 时为空格子。
    pub fn unpack(record: u16) -> Option<Self> {
        let stored = record & PALETTE_LIMIT;
        if stored == 0 {
            return None;
        }
        Some(Self {
            palette_index: stored - 1,
            rotation: RotationCode::from_bits(record >> ROTATION_SHIFT),
            flip_x: record & FLIP_X_BIT != 0,
            flip_y: record & FLIP_Y_BIT != 0,
        })
    }
}
