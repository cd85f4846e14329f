use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// gzip 魔数
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// 判断是否为 gzip 数据
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == GZIP_MAGIC
}

/// 解压 gzip 数据
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// 压缩数据为 gzip 格式
pub fn compress_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// 二进制帧转文本：gzip 先解压，否则按 UTF-8 解析
pub fn frame_to_text(data: &[u8]) -> Result<String, std::io::Error> {
    let bytes = if is_gzip(data) {
        decompress_gzip(data)?
    } else {
        data.to_vec()
    };
    String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// 生成请求 ID（operationID / ackId）
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_frame_decodes_to_text() {
        let packed = compress_gzip(br#"{"event":"newMessage"}"#).unwrap();
        assert!(is_gzip(&packed));
        assert_eq!(frame_to_text(&packed).unwrap(), r#"{"event":"newMessage"}"#);
    }

    #[test]
    fn plain_frame_is_passed_through() {
        assert_eq!(frame_to_text(b"hello").unwrap(), "hello");
        assert!(frame_to_text(&[0xff, 0xfe]).is_err());
    }
}
