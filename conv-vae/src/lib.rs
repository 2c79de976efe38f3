pub mod fit_conv_vae;
pub mod image_output;
pub mod mnist_input;
