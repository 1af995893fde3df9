//! 缓存文件的二进制格式，全部为小端序
//!
//! * 词典：`[rows: i32][cols: i32]` + rows * cols 个 f32，行优先
//! * 特征：`[rows: i32][cols: i32][height: i32][width: i32]`，之后每个特征点依次为
//!   `[angle][class_id][octave][x][y][response][size]` 和该点的描述符
//! * 颜色直方图：`[cols: i32]` + cols 个 f32

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::prelude::*;

use crate::entry::{Features, KeyPoint};
use crate::vocabulary::Vocabulary;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn write_len<W: Write>(w: &mut W, n: usize) -> io::Result<()> {
    let n = i32::try_from(n).map_err(|_| invalid(format!("长度 {n} 超出 i32 范围")))?;
    w.write_i32::<LittleEndian>(n)
}

fn read_len<R: Read>(r: &mut R) -> io::Result<usize> {
    let n = r.read_i32::<LittleEndian>()?;
    usize::try_from(n).map_err(|_| invalid(format!("无效的长度 {n}")))
}

/// 单个缓存文件允许的最大 f32 数量
const MAX_VALUES: usize = 1 << 28;

fn checked_area(rows: usize, cols: usize) -> io::Result<usize> {
    rows.checked_mul(cols)
        .filter(|&n| n <= MAX_VALUES)
        .ok_or_else(|| invalid(format!("矩阵过大: {rows} x {cols}")))
}

fn read_f32s<R: Read>(r: &mut R, n: usize) -> io::Result<Vec<f32>> {
    let mut buf = vec![0.0; n];
    r.read_f32_into::<LittleEndian>(&mut buf)?;
    Ok(buf)
}

pub fn write_vocabulary<W: Write>(w: &mut W, vocab: &Vocabulary) -> io::Result<()> {
    let centroids = vocab.centroids();
    write_len(w, centroids.nrows())?;
    write_len(w, centroids.ncols())?;
    for &v in centroids.iter() {
        w.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

pub fn read_vocabulary<R: Read>(r: &mut R) -> io::Result<Vocabulary> {
    let rows = read_len(r)?;
    let cols = read_len(r)?;
    let data = read_f32s(r, checked_area(rows, cols)?)?;
    let centroids = Array2::from_shape_vec((rows, cols), data).map_err(|e| invalid(e.to_string()))?;
    Ok(Vocabulary::new(centroids))
}

pub fn write_features<W: Write>(w: &mut W, features: &Features) -> io::Result<()> {
    write_len(w, features.len())?;
    write_len(w, features.dim())?;
    write_len(w, features.height() as usize)?;
    write_len(w, features.width() as usize)?;
    for (kp, row) in features.keypoints().iter().zip(features.descriptors().rows()) {
        w.write_f32::<LittleEndian>(kp.angle)?;
        w.write_i32::<LittleEndian>(kp.class_id)?;
        w.write_i32::<LittleEndian>(kp.octave)?;
        w.write_f32::<LittleEndian>(kp.x)?;
        w.write_f32::<LittleEndian>(kp.y)?;
        w.write_f32::<LittleEndian>(kp.response)?;
        w.write_f32::<LittleEndian>(kp.size)?;
        for &v in row.iter() {
            w.write_f32::<LittleEndian>(v)?;
        }
    }
    Ok(())
}

pub fn read_features<R: Read>(r: &mut R) -> io::Result<Features> {
    let rows = read_len(r)?;
    let cols = read_len(r)?;
    let height = read_len(r)? as u32;
    let width = read_len(r)? as u32;

    let mut keypoints = Vec::with_capacity(rows.min(MAX_VALUES / 8));
    let mut descriptors = Vec::with_capacity(checked_area(rows, cols)?);
    for _ in 0..rows {
        let angle = r.read_f32::<LittleEndian>()?;
        let class_id = r.read_i32::<LittleEndian>()?;
        let octave = r.read_i32::<LittleEndian>()?;
        let x = r.read_f32::<LittleEndian>()?;
        let y = r.read_f32::<LittleEndian>()?;
        let response = r.read_f32::<LittleEndian>()?;
        let size = r.read_f32::<LittleEndian>()?;
        keypoints.push(KeyPoint { x, y, size, angle, response, octave, class_id });
        descriptors.extend(read_f32s(r, cols)?);
    }

    let descriptors =
        Array2::from_shape_vec((rows, cols), descriptors).map_err(|e| invalid(e.to_string()))?;
    Features::new(height, width, keypoints, descriptors).map_err(|e| invalid(e.to_string()))
}

pub fn write_color_histogram<W: Write>(w: &mut W, hist: &[f32]) -> io::Result<()> {
    write_len(w, hist.len())?;
    for &v in hist {
        w.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

pub fn read_color_histogram<R: Read>(r: &mut R) -> io::Result<Vec<f32>> {
    let cols = read_len(r)?;
    read_f32s(r, checked_area(1, cols)?)
}
