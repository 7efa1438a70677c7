use async_trait::async_trait;

use super::{Producer, SliceError};
use crate::core::config::SliceConfig;
use crate::core::{NewCut, Slice};

const CUT_ID: &str = "separator";

/// A fixed run of filler characters. Never changes after init.
pub struct Separator {
    text: String,
}

impl Separator {
    pub fn new(ch: &str, width: usize) -> Self {
        Self {
            text: ch.repeat(width),
        }
    }

    pub fn from_config(config: &SliceConfig) -> Self {
        Self::new(
            config.char.as_deref().unwrap_or(" "),
            config.width.unwrap_or(1),
        )
    }
}

#[async_trait]
impl Producer for Separator {
    fn name(&self) -> &str {
        CUT_ID
    }

    fn init(&mut self, slice: &mut Slice) -> Result<(), SliceError> {
        slice.add_cut(NewCut::new(CUT_ID, self.text.clone()).raw())?;
        Ok(())
    }

    async fn update(&mut self, _slice: &mut Slice) -> Result<(), SliceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SliceStyle;

    #[test]
    fn test_separator_is_not_padded() {
        let config = SliceConfig {
            char: Some("|".into()),
            width: Some(3),
            ..Default::default()
        };
        let mut sep = Separator::from_config(&config);
        let mut slice = Slice::new("separator", SliceStyle::default());
        sep.init(&mut slice).unwrap();
        assert_eq!(slice.cut(CUT_ID).unwrap().text(), "|||");
    }

    #[test]
    fn test_default_is_single_space() {
        let mut sep = Separator::from_config(&SliceConfig::default());
        let mut slice = Slice::new("separator", SliceStyle::default());
        sep.init(&mut slice).unwrap();
        assert_eq!(slice.cut(CUT_ID).unwrap().text(), " ");
    }
}
