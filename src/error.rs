use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("edge shape requires at least 2 points")]
    DegenerateShape,
    #[error("tile id must carry a zero in-tile index")]
    InvalidTileId,
    #[error("node edge range exceeds the tile's directed edges")]
    EdgeRangeOutOfBounds,
    #[error("directed edge references a missing edge info record")]
    EdgeInfoOutOfBounds,
    #[error("tile must carry exactly {0} bins")]
    InvalidBinCount(usize),
}
