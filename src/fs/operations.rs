use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

const SCAN_CHUNK: usize = 1024;

/// Finds the byte offset at which the final line of `file` starts. A newline terminating that
/// line is ignored, so `"a\nb\n"` and `"a\nb"` both report the offset of `b`. An empty file
/// reports 0. The cursor position after the call is unspecified.
///
/// Useful when the last line of a journal needs to be replaced with fresher data.
pub async fn final_line_offset(
    file: &mut (impl AsyncSeek + AsyncRead + Unpin),
) -> Result<u64, io::Error> {
    let len = file.seek(std::io::SeekFrom::End(0)).await?;
    let mut buffer = [0u8; SCAN_CHUNK];
    let mut position = len;

    while position > 0 {
        let chunk = u64::min(position, SCAN_CHUNK as u64) as usize;
        position -= chunk as u64;
        file.seek(std::io::SeekFrom::Start(position)).await?;
        file.read_exact(&mut buffer[..chunk]).await?;

        for (index, value) in buffer[..chunk].iter().enumerate().rev() {
            if *value != b'\n' {
                continue;
            }
            let absolute = position + index as u64;
            // The newline closing the file belongs to the final line itself.
            if absolute + 1 == len {
                continue;
            }
            return Ok(absolute + 1);
        }
    }

    Ok(0)
}
