//! Environment kept in NOR flash.
//!
//! Leverages `sequential-storage` to keep a single map item in flash and `postcard`
//! to serialize it, so a power cut during `save` leaves the previous copy intact.

use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::{
    cache::KeyPointerCache,
    map::{SerializationError, Value},
};

use super::Env;
use crate::{Error, Result};

/// Largest serialized environment.
pub const MAX_ENV_SIZE: usize = 1024;

impl<'a> Value<'a> for Env {
    fn serialize_into(&self, buffer: &mut [u8]) -> core::result::Result<usize, SerializationError> {
        let buffer = postcard::to_slice(self, buffer).map_err(|e| match e {
            postcard::Error::SerializeBufferFull => SerializationError::BufferTooSmall,
            _ => SerializationError::Custom(0),
        })?;

        Ok(buffer.len())
    }

    fn deserialize_from(buffer: &'a [u8]) -> core::result::Result<Self, SerializationError>
    where
        Self: Sized,
    {
        postcard::from_bytes(buffer).map_err(|e| match e {
            postcard::Error::DeserializeUnexpectedEnd => SerializationError::BufferTooSmall,
            postcard::Error::DeserializeBadVarint
            | postcard::Error::DeserializeBadBool
            | postcard::Error::DeserializeBadChar
            | postcard::Error::DeserializeBadUtf8
            | postcard::Error::DeserializeBadOption
            | postcard::Error::DeserializeBadEnum
            | postcard::Error::DeserializeBadEncoding => SerializationError::InvalidFormat,
            _ => SerializationError::Custom(0),
        })
    }
}

pub struct PersistentEnv<NVM: NorFlash> {
    nvm: NVM,
    nvm_cache: KeyPointerCache<2, (), 1>,
}

impl<NVM: NorFlash> PersistentEnv<NVM> {
    pub fn new(nvm: NVM) -> Self {
        Self {
            nvm,
            nvm_cache: KeyPointerCache::new(),
        }
    }

    /// Load the saved environment; an empty store yields an empty environment.
    pub async fn load(&mut self) -> Result<Env> {
        let nvm_size = self.nvm.capacity() as u32;
        let mut data_buffer = [0u8; MAX_ENV_SIZE];

        let env = sequential_storage::map::fetch_item::<(), Env, _>(
            &mut self.nvm,
            0..nvm_size,
            &mut self.nvm_cache,
            &mut data_buffer,
            &(),
        )
        .await
        .map_err(|_| Error::Io)?;

        Ok(match env {
            Some(env) => env,
            None => {
                log::debug!("Environment NVM does not contain value, using defaults");
                Env::new()
            }
        })
    }

    pub async fn save(&mut self, env: &Env) -> Result<()> {
        let nvm_size = self.nvm.capacity() as u32;
        let mut data_buffer = [0u8; MAX_ENV_SIZE];

        log::debug!("Saving environment");

        sequential_storage::map::store_item::<(), Env, _>(
            &mut self.nvm,
            0..nvm_size,
            &mut self.nvm_cache,
            &mut data_buffer,
            &(),
            env,
        )
        .await
        .map_err(|_| Error::Io)
    }
}
