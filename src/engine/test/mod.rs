
mod redirects;
mod streaming;
mod upload;
