//! The token vocabulary embedded in a model container.

use std::collections::HashMap;

use gguf::{Metadata, MetadataError};

use crate::names;

/// The identifier of a token in the vocabulary.
pub type TokenId = u32;

/// Token string to id lookup (and back) over the container's embedded
/// token list.
///
/// This is a plain associative table; tokenization itself is a collaborator
/// concern and not implemented here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vocabulary {
    id_to_token: Vec<String>,
    token_to_id: HashMap<String, TokenId>,
}

impl Vocabulary {
    /// Reads the token list from the metadata directory. A container
    /// without one yields an empty vocabulary.
    pub(crate) fn read(metadata: &Metadata) -> Result<Self, MetadataError> {
        if !metadata.contains_key(names::KEY_TOKEN_LIST) {
            return Ok(Self::default());
        }
        let tokens = metadata.get_string_array(names::KEY_TOKEN_LIST)?;
        Ok(Self::from_tokens(tokens.iter().cloned()))
    }

    /// Builds a vocabulary from an ordered token list; a token's id is its
    /// position in the list.
    pub fn from_tokens(tokens: impl IntoIterator<Item = String>) -> Self {
        let id_to_token: Vec<String> = tokens.into_iter().collect();
        let token_to_id = id_to_token
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id as TokenId))
            .collect();
        Self {
            id_to_token,
            token_to_id,
        }
    }

    /// The token with the given id, if any.
    pub fn token(&self, id: TokenId) -> Option<&str> {
        self.id_to_token.get(id as usize).map(String::as_str)
    }

    /// The id of the given token, if any.
    pub fn id(&self, token: &str) -> Option<TokenId> {
        self.token_to_id.get(token).copied()
    }

    /// The number of tokens.
    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    /// Returns true if the vocabulary holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_symmetric() {
        let vocabulary = Vocabulary::from_tokens(
            ["</s>", "a", "panda"].into_iter().map(str::to_string),
        );
        assert_eq!(vocabulary.len(), 3);
        assert_eq!(vocabulary.token(2), Some("panda"));
        assert_eq!(vocabulary.id("panda"), Some(2));
        assert_eq!(vocabulary.token(3), None);
        assert_eq!(vocabulary.id("bamboo"), None);
    }
}
