use std::{iter::Iterator, marker::PhantomData};

use crate::NUMBER_OF_CAMERAS;

/// Endless iterator over synchronized frame pairs.
pub struct StereoFrames<'a, I, S: ?Sized> {
    source: &'a mut S,
    _image: PhantomData<I>,
}

impl<'a, I, S> StereoFrames<'a, I, S>
where
    S: StereoSource<I> + ?Sized,
{
    pub fn new(source: &'a mut S) -> Self {
        StereoFrames {
            source,
            _image: PhantomData,
        }
    }
}

impl<'a, I, S> Iterator for StereoFrames<'a, I, S>
where
    S: StereoSource<I> + ?Sized,
{
    type Item = anyhow::Result<[I; NUMBER_OF_CAMERAS]>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.source.get_images())
    }
}

pub trait StereoSource<I> {
    /// Blocks until one image from each camera is available, ordered by logical id.
    fn get_images(&mut self) -> anyhow::Result<[I; NUMBER_OF_CAMERAS]>;

    fn frames(&mut self) -> StereoFrames<'_, I, Self>
    where
        Self: Sized,
    {
        StereoFrames::new(self)
    }
}
